//! Domain error types shared by capability implementations.

use thiserror::Error;

/// Errors raised by job and catalog storage backends.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },
}

/// Errors raised when fetching a single document from storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Document not found at '{0}'")]
    NotFound(String),

    #[error("Fetch timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid storage path '{0}'")]
    InvalidPath(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(err.to_string()),
            _ => FetchError::Io(err.to_string()),
        }
    }
}
