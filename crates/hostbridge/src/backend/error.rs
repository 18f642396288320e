//! Backend error types.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur while connecting to or querying a model backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No model registered under this id.
    #[error("Model {0} not connected")]
    NotConnected(String),

    /// No adapter for the requested model type.
    #[error("Unsupported model type: {0}")]
    UnsupportedKind(String),

    /// Connection config is missing or malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backend is reachable but does not serve the model.
    #[error("{0}")]
    ModelUnavailable(String),

    /// Backend could not be reached.
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Backend answered with a non-success status.
    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
}
