//! Error types for jobswarm.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Argument of the wrong shape. Raised before any store I/O.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("this operation requires a client initialized with `controller = true`")]
    Permission,

    #[error("entity not found: {0}")]
    NotFound(String),

    /// A transaction lost a race against a concurrent writer of the same key.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
