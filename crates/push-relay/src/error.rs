//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected error
    #[error("Not connected to push channel")]
    NotConnected,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not a message object
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Send error
    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
