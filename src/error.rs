//! Common error types for the conversion monitor

use thiserror::Error;

/// Common result type for monitor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types across the conversion-tracking layer
///
/// Public tracking entry points never surface these to callers; they are
/// converted into structured outcomes so tracking failures cannot block the
/// business action being measured.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// External collaborator call failed (tag delivery, enhanced conversion,
    /// booking state)
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Invalid conversion payload
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
