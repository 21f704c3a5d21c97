//! Sync error types.

use thiserror::Error;

/// Sync error type.
#[derive(Error, Debug)]
pub enum SyncError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Control plane answered with a non-2xx status
    #[error("Request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown task status name
    #[error("Invalid task status: {0}")]
    InvalidStatus(String),
}

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;
