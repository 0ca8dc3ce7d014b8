//! Authentication handshake.
//!
//! Runs once per connection, before the dispatcher takes over the read half:
//! wait for `auth_required`, present the access token, then expect `auth_ok`.

use crate::session::SessionState;
use crate::transport::{FrameSink, FrameStream};
use crate::{SessionError, SessionResult};
use hass_ws_protocol::{AuthMessage, ProtocolError};
use tracing::{debug, warn};

/// Authenticate a freshly opened connection.
///
/// Returns the server version announced in `auth_ok`. `on_state` is called
/// when the handshake moves from waiting for the challenge to authenticating.
pub(crate) async fn authenticate(
    sink: &mut dyn FrameSink,
    stream: &mut dyn FrameStream,
    access_token: &str,
    mut on_state: impl FnMut(SessionState),
) -> SessionResult<String> {
    let challenge = match stream.recv().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(SessionError::Handshake(e.to_string())),
        None => {
            return Err(SessionError::Handshake(
                "connection closed before auth_required".to_string(),
            ))
        }
    };

    match AuthMessage::from_json(&challenge) {
        Ok(AuthMessage::AuthRequired { ha_version }) => {
            debug!(ha_version = ?ha_version, "Server requested authentication");
        }
        Ok(other) => {
            return Err(SessionError::Handshake(format!(
                "expected auth_required, got {}",
                kind_of(&other)
            )))
        }
        Err(e) => return Err(SessionError::Handshake(e.to_string())),
    }

    on_state(SessionState::Authenticating);

    let credential = AuthMessage::auth(access_token)
        .to_json()
        .map_err(|e| SessionError::Handshake(e.to_string()))?;
    sink.send(credential)
        .await
        .map_err(|e| SessionError::Handshake(e.to_string()))?;

    let reply = match stream.recv().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(SessionError::Handshake(e.to_string())),
        None => {
            return Err(SessionError::Handshake(
                "connection closed before auth reply".to_string(),
            ))
        }
    };

    match AuthMessage::from_json(&reply) {
        Ok(AuthMessage::AuthOk { ha_version }) => Ok(ha_version),
        Ok(AuthMessage::AuthInvalid { message }) => {
            let message = message.unwrap_or_else(|| "credential rejected".to_string());
            warn!(reason = %message, "Server rejected the access token");
            Err(SessionError::Authentication(message))
        }
        Ok(other) => Err(SessionError::Authentication(format!(
            "unexpected {} reply",
            kind_of(&other)
        ))),
        Err(ProtocolError::MalformedFrame(e)) => Err(SessionError::Handshake(e)),
        Err(e) => Err(SessionError::Authentication(e.to_string())),
    }
}

fn kind_of(message: &AuthMessage) -> &'static str {
    match message {
        AuthMessage::AuthRequired { .. } => "auth_required",
        AuthMessage::Auth { .. } => "auth",
        AuthMessage::AuthOk { .. } => "auth_ok",
        AuthMessage::AuthInvalid { .. } => "auth_invalid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{channel_transport, ChannelServer, Connector, TransportPair};

    async fn open() -> (TransportPair, ChannelServer) {
        let (connector, mut listener) = channel_transport();
        let pair = connector.connect("memory://ha").await.unwrap();
        let server = listener.accept().await.unwrap();
        (pair, server)
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let ((mut sink, mut stream), mut server) = open().await;
        let server_task = tokio::spawn(async move { server.authenticate("2024.1.0").await });

        let mut states = Vec::new();
        let version = authenticate(sink.as_mut(), stream.as_mut(), "token", |s| states.push(s))
            .await
            .unwrap();

        assert_eq!(version, "2024.1.0");
        assert_eq!(states, vec![SessionState::Authenticating]);
        assert_eq!(server_task.await.unwrap().as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let ((mut sink, mut stream), mut server) = open().await;
        server.send(r#"{"type":"auth_required"}"#);
        server.send(r#"{"type":"auth_invalid","message":"Invalid access token"}"#);

        let err = authenticate(sink.as_mut(), stream.as_mut(), "bad", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Authentication(m) if m == "Invalid access token"));
        assert!(server.recv().await.unwrap().contains("\"access_token\":\"bad\""));
    }

    #[tokio::test]
    async fn test_authenticate_wrong_challenge() {
        let ((mut sink, mut stream), server) = open().await;
        server.send(r#"{"id":1,"type":"result","success":true,"result":null}"#);

        let err = authenticate(sink.as_mut(), stream.as_mut(), "token", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_authenticate_closed_before_challenge() {
        let ((mut sink, mut stream), server) = open().await;
        drop(server);

        let err = authenticate(sink.as_mut(), stream.as_mut(), "token", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_authenticate_non_json_reply() {
        let ((mut sink, mut stream), server) = open().await;
        server.send(r#"{"type":"auth_required"}"#);
        server.send("<html>");

        let err = authenticate(sink.as_mut(), stream.as_mut(), "token", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_authenticate_unexpected_reply_shape() {
        let ((mut sink, mut stream), server) = open().await;
        server.send(r#"{"type":"auth_required"}"#);
        server.send(r#"{"type":"auth_ok"}"#);

        let err = authenticate(sink.as_mut(), stream.as_mut(), "token", |_| {})
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }
}
