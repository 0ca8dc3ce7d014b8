//! Frame transports.
//!
//! A connector opens a connection and hands back its two halves. The write
//! half is shared by every caller behind the session's writer lock; the read
//! half is moved into the dispatcher task, which is the only place frames are
//! ever received.

mod channel;
mod ws;

pub use channel::{channel_transport, ChannelConnector, ChannelListener, ChannelServer};
pub use ws::{websocket_url, WsConnector};

use crate::TransportError;
use async_trait::async_trait;

/// Both halves of an open connection.
pub type TransportPair = (Box<dyn FrameSink>, Box<dyn FrameStream>);

/// Opens connections to a server address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh connection. Connections are never reused across sessions.
    async fn connect(&self, server: &str) -> Result<TransportPair, TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next frame; `None` once the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}
