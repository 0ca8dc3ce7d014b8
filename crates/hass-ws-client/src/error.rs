//! Client error types.

use hass_ws_core::{HassError, SessionError};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a failed result
    #[error("Request rejected: {0}")]
    Rejected(HassError),

    /// The result payload did not match the expected model
    #[error("Failed to decode {operation} result: {reason}")]
    Decode { operation: String, reason: String },

    /// Session error
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ClientError {
    /// Whether the failure was a rejected access token.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Session(e) if e.is_authentication())
    }
}

/// Result type alias using ClientError.
pub type ClientResult<T> = Result<T, ClientError>;
