//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
///
/// Messages may name storage keys but never contain stored values.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entry not found.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Entry already exists.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// The backend could not be opened or reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A query against the backend failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Rejected key, namespace or argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
