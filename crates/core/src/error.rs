//! Error types shared by all coldtier backends
//!
//! The taxonomy separates failures that are worth retrying (transient
//! network trouble) from failures that are not (missing configuration,
//! absent objects, operations a backend cannot perform). Backends never
//! terminate the process; every failure travels back to the caller as a
//! `Result`.

use thiserror::Error;

/// Result type alias using the coldtier error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration. The message names the offending
    /// property. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Object or bucket does not exist. Never retried; callers decide
    /// whether absence is acceptable.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication or authorization rejection. Never retried.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Transient transport or server failure. Retried with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A ranged read asked for more bytes than the remote object holds.
    #[error("range read failed: {0}")]
    Range(String),

    /// The backend has no meaningful implementation of this operation.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// The post-write stat disagrees with the expected size. The write is
    /// treated as failed even though bytes were transmitted; the caller
    /// must not persist the returned key or metadata.
    #[error("verification mismatch: expected {expected} bytes, remote has {actual}")]
    VerificationMismatch { expected: u64, actual: u64 },

    /// Invalid path or location string
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// General errors that don't fit other categories
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Build an [`Error::Unsupported`] carrying the operation name so
    /// callers can branch on it programmatically.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Error::Unsupported {
            operation: operation.into(),
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            // Backends map timeouts, connection trouble and 5xx-class
            // responses to Network, so the whole class is transient.
            Error::Network(_) => true,
            Error::Io(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                )
            }
            // Non-retryable errors
            Error::Config(_)
            | Error::NotFound(_)
            | Error::Auth(_)
            | Error::Range(_)
            | Error::Unsupported { .. }
            | Error::VerificationMismatch { .. }
            | Error::InvalidPath(_) => false,
            // General errors might be retryable
            Error::General(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout") || msg_lower.contains("temporary")
            }
        }
    }
}
