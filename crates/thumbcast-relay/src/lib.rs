//! Thumbcast Relay Library
//!
//! Core functionality for the Thumbcast relay:
//! - Bus clients (Redis pub/sub and an in-process bus)
//! - Stream sessions binding one client connection to one bus subscription
//! - Registry of live sessions
//! - HTTP surface (event-stream endpoint, health check)
//! - Console subscriber used by `thumbcast-subscriber`

pub mod bus;
pub mod console;
pub mod error;
pub mod server;
pub mod session;

pub use error::RelayError;
