//! WebSocket transport over `tokio-tungstenite`.

use super::{Connector, FrameSink, FrameStream, TransportPair};
use crate::TransportError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Path of the WebSocket API below the server root.
const API_PATH: &str = "/api/websocket";

/// Build the WebSocket endpoint for a server address.
///
/// `http`/`https` addresses map to `ws`/`wss`, and the API path is appended
/// unless it is already present.
pub fn websocket_url(server: &str) -> Result<Url, TransportError> {
    let mut url =
        Url::parse(server).map_err(|e| TransportError::InvalidUrl(format!("{server}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(format!("cannot use scheme '{scheme}'")))?;

    if !url.path().ends_with(API_PATH) {
        let path = format!("{}{}", url.path().trim_end_matches('/'), API_PATH);
        url.set_path(&path);
    }

    Ok(url)
}

/// Connects to a Home Assistant server over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, server: &str) -> Result<TransportPair, TransportError> {
        let url = websocket_url(server)?;
        info!(url = %url, "Opening WebSocket");

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();

        Ok((Box::new(WsSink { inner: write }), Box::new(WsFrames { inner: read })))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await?;
        Ok(())
    }
}

struct WsFrames {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => {
                        warn!(error = %e, "Skipping non UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "WebSocket closed by server");
                    return None;
                }
                // Pings are answered by tungstenite on the next read/write
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
