//! Error types for label-block operations.

/// Error type for codec and block-operator failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Block dimensions are non-positive or not multiples of 8.
    BadDimensions(String),

    /// Input byte length is inconsistent with the block geometry or the
    /// serialized header.
    BufferTooShort { expected: usize, got: usize },

    /// A serialized block stream fails invariant checks.
    MalformedBlock(String),

    /// A mutation was used after `done`.
    MutationClosed,

    /// A down-resolution store step failed; wraps the inner store error.
    StoreDownres(String),

    /// Writing projected output to a sink failed.
    Io(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BadDimensions(msg) => write!(f, "Bad dimensions: {}", msg),
            Error::BufferTooShort { expected, got } => {
                write!(f, "Buffer too short: expected {} bytes, got {}", expected, got)
            }
            Error::MalformedBlock(msg) => write!(f, "Malformed block: {}", msg),
            Error::MutationClosed => write!(f, "Mutation already closed"),
            Error::StoreDownres(msg) => write!(f, "Down-resolution store failed: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Result type alias for label-block operations.
pub type Result<T> = std::result::Result<T, Error>;
