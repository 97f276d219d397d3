//! Stream sessions and their registry.

pub mod registry;
pub mod stream;

pub use registry::{SessionInfo, SessionRegistry};
pub use stream::{CloseReason, SessionId, SessionState, StreamSession};
