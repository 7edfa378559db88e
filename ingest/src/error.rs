//! Error types for ingest operations.

use common::StorageError;

/// Error type for ingest operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Block encoding or key decoding errors.
    Encoding(String),

    /// Storage-related errors from the underlying key-value layer.
    Storage(String),

    /// The writer task is gone.
    Shutdown,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Shutdown => write!(f, "Ingest writer shut down"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<labelblock::Error> for Error {
    fn from(err: labelblock::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

/// Result type alias for ingest operations.
pub type Result<T> = std::result::Result<T, Error>;
