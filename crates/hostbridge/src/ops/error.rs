//! Operation error types.

use thiserror::Error;

/// Result type for file and command operations.
pub type OpResult<T> = Result<T, OpError>;

/// Errors that can occur while running a file or command operation.
#[derive(Debug, Error)]
pub enum OpError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Parameters were rejected before anything ran.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Command exceeded its deadline and was killed.
    #[error("command timed out after {secs} seconds")]
    Timeout { secs: u64 },

    /// Command could not be started.
    #[error("failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpError {
    /// Map an IO error on `path`, turning `NotFound` into the dedicated variant.
    pub(crate) fn from_io(path: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            OpError::NotFound(path.to_string())
        } else {
            OpError::Io(err)
        }
    }
}
