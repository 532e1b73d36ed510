//! Common error types for TRK

use thiserror::Error;

/// Common result type for TRK operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the TRK host and its tooling
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested job, document, node or snapshot does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Version token mismatch on a conditional write, or an illegal state change
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Working directory or storage allocation failed
    #[error("Resource error: {0}")]
    Resource(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a `NotFound` naming the kind of thing and its id
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{} {}", what, id))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON serialization failed: {}", err))
    }
}
