//! Session and transport error types.

use hass_ws_protocol::{HassError, ProtocolError};
use thiserror::Error;

/// Error type surfaced by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport could not be opened
    #[error("Connection failure: {0}")]
    Connect(String),

    /// The server did not follow the authentication handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server rejected the credential
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The session is not authenticated or its transport is closed
    #[error("Session is not ready")]
    NotReady,

    /// The server refused a subscribe command
    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(HassError),

    /// The session closed while the operation was pending
    #[error("Session closed")]
    SessionClosed,

    /// Outbound command could not be encoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Whether the failure was a rejected credential, as opposed to an
    /// unreachable or incompatible server.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;

/// Error type raised by transports.
#[derive(Error, Debug)]
pub enum TransportError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server address cannot be turned into a WebSocket endpoint
    #[error("Invalid server address: {0}")]
    InvalidUrl(String),

    /// The peer refused the connection
    #[error("Connection refused: {0}")]
    Refused(String),

    /// The transport is already closed
    #[error("Transport closed")]
    Closed,
}
