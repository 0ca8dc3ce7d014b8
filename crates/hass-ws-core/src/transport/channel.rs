//! In-memory transport.
//!
//! Every `connect` creates a fresh pair of unbounded channels and hands the
//! server end to the [`ChannelListener`]. Used to drive sessions against a
//! scripted peer without opening sockets.

use super::{Connector, FrameSink, FrameStream, TransportPair};
use crate::TransportError;
use async_trait::async_trait;
use hass_ws_protocol::{AuthMessage, Command, Envelope};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create a connector and the listener receiving its connections.
pub fn channel_transport() -> (ChannelConnector, ChannelListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connector = ChannelConnector {
        accept_tx,
        refuse: Arc::new(AtomicBool::new(false)),
    };
    (connector, ChannelListener { accept_rx })
}

/// Client side connector of the in-memory transport.
#[derive(Clone)]
pub struct ChannelConnector {
    accept_tx: mpsc::UnboundedSender<ChannelServer>,
    refuse: Arc<AtomicBool>,
}

impl ChannelConnector {
    /// Make subsequent connection attempts fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, server: &str) -> Result<TransportPair, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Refused(server.to_string()));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let server_end = ChannelServer {
            server: server.to_string(),
            to_client,
            from_client,
        };
        self.accept_tx
            .send(server_end)
            .map_err(|_| TransportError::Refused(server.to_string()))?;

        Ok((
            Box::new(ChannelSink {
                tx: Some(to_server),
            }),
            Box::new(ChannelFrames { rx: from_server }),
        ))
    }
}

/// Receives the server ends of connections made through a [`ChannelConnector`].
pub struct ChannelListener {
    accept_rx: mpsc::UnboundedReceiver<ChannelServer>,
}

impl ChannelListener {
    /// Wait for the next connection. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<ChannelServer> {
        self.accept_rx.recv().await
    }

    /// Wait for the next connection and complete the handshake with `version`.
    pub async fn accept_authenticated(&mut self, version: &str) -> Option<ChannelServer> {
        let mut server = self.accept().await?;
        server.authenticate(version).await?;
        Some(server)
    }
}

/// Server end of one in-memory connection.
///
/// Dropping it closes the connection from the client's point of view.
pub struct ChannelServer {
    server: String,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ChannelServer {
    /// Address the client connected to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Push a raw frame to the client. Returns false if the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }

    /// Push an envelope to the client.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        self.send(envelope.to_json())
    }

    /// Receive the next raw frame written by the client.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Receive the next command written by the client, skipping frames that
    /// are not commands.
    pub async fn recv_command(&mut self) -> Option<Command> {
        loop {
            let frame = self.recv().await?;
            if let Ok(command) = Command::from_json(&frame) {
                return Some(command);
            }
        }
    }

    /// Play the server side of a successful handshake.
    ///
    /// Returns the access token the client presented.
    pub async fn authenticate(&mut self, version: &str) -> Option<String> {
        let required = AuthMessage::AuthRequired {
            ha_version: Some(version.to_string()),
        };
        self.send(required.to_json().ok()?);

        let token = match AuthMessage::from_json(&self.recv().await?).ok()? {
            AuthMessage::Auth { access_token } => access_token,
            _ => return None,
        };

        let ok = AuthMessage::AuthOk {
            ha_version: version.to_string(),
        };
        self.send(ok.to_json().ok()?);
        Some(token)
    }
}

struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }
}

struct ChannelFrames {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for ChannelFrames {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}
