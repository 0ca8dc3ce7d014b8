//! Protocol error types.

use thiserror::Error;

/// Protocol error type.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Inbound frame is not valid JSON, not an object, or lacks required fields
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Inbound frame is well-formed JSON but not the message expected here
    #[error("Unexpected frame type: {0}")]
    UnexpectedFrame(String),

    /// Command parameter collides with a reserved envelope key
    #[error("Parameter key '{0}' is reserved")]
    ReservedKey(String),

    /// Command parameters are not a JSON object
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ProtocolError.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
