//! Error types for Thumbcast core library.

use thiserror::Error;

/// Result type alias using Thumbcast Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Thumbcast operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel name rejected by validation
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),
}
