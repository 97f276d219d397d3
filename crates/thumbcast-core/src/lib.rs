//! Thumbcast Core Library
//!
//! Shared functionality for Thumbcast components:
//! - Validated bus channel names
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod channel;
pub mod config;
pub mod error;
pub mod tracing_init;

pub use channel::Channel;
pub use config::{BusConfig, Config, RelayConfig};
pub use error::{Error, Result};
