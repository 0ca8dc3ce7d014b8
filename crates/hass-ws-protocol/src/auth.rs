//! Authentication handshake frames.
//!
//! These are exchanged once, before any command, and carry no `id`.

use crate::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame of the authentication phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMessage {
    /// Server greeting; the client must authenticate next.
    AuthRequired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ha_version: Option<String>,
    },
    /// Client credential.
    Auth { access_token: String },
    /// Credential accepted.
    AuthOk { ha_version: String },
    /// Credential rejected.
    AuthInvalid {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl AuthMessage {
    /// Create an AUTH message.
    pub fn auth(access_token: &str) -> Self {
        Self::Auth {
            access_token: access_token.to_string(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    ///
    /// Non-JSON input is a [`ProtocolError::MalformedFrame`]; JSON that is not
    /// one of the known handshake frames is a [`ProtocolError::UnexpectedFrame`].
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>")
            .to_string();
        serde_json::from_value(value).map_err(|_| ProtocolError::UnexpectedFrame(kind))
    }
}
