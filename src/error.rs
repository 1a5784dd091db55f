//! Error types for adbwire
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using AdbError
pub type Result<T> = std::result::Result<T, AdbError>;

/// Unified error type for adbwire operations
#[derive(Debug, Error)]
pub enum AdbError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    /// The socket died: read/write/close failure, truncated read, timeout.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    /// The wire data was not parsable.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote answered with a well-formed FAIL.
    #[error("Remote failure: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AdbError {
    /// Whether the connection that produced this error must be discarded.
    ///
    /// A `Remote` failure is reported as fatal because adbd closes the sync
    /// connection right after sending FAIL.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            AdbError::Io(_) | AdbError::Protocol(_) | AdbError::Remote(_) | AdbError::Cancelled
        )
    }

    /// Whether the remote end explicitly refused the request.
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, AdbError::Remote(_))
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        AdbError::Protocol(message.into())
    }
}
