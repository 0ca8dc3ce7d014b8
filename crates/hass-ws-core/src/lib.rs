//! Session engine for the Home Assistant WebSocket API.
//!
//! This crate provides:
//! - Transports: WebSocket via `tokio-tungstenite`, and an in-memory pair
//! - The authentication handshake
//! - Request/response correlation over a single dispatcher task
//! - Event subscriptions with cancellation
//! - Worker sessions owned by a parent session

mod correlator;
mod dispatcher;
mod error;
mod handshake;
mod session;
mod subscription;
pub mod transport;

pub use error::{SessionError, SessionResult, TransportError};
pub use session::{
    Session, SessionConfig, SessionMeta, SessionState, Worker, SUBSCRIBE_EVENTS,
    UNSUBSCRIBE_EVENTS,
};
pub use subscription::{Subscription, SubscriptionHandle, UnsubscribePolicy};
pub use transport::{channel_transport, ChannelConnector, ChannelListener, ChannelServer, WsConnector};

pub use hass_ws_protocol::{Command, Envelope, HassError, MessageId, Response};

/// Connect to `server` over WebSocket and authenticate with `access_token`.
pub async fn connect(server: &str, access_token: &str) -> SessionResult<Session> {
    Session::connect(SessionConfig::new(server, access_token)).await
}
