//! Command frames and inbound envelopes.
//!
//! Every steady-state frame carries a numeric `id` and a `type`. Commands
//! flatten their parameters next to those two keys, so parameters must not
//! use either name.

use crate::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Numeric identifier correlating commands, results and events.
pub type MessageId = i64;

/// Identifier reported by envelopes whose `type` is not routable.
pub const UNROUTABLE_ID: MessageId = -1;

/// Keys owned by the envelope itself.
pub const RESERVED_KEYS: [&str; 2] = ["id", "type"];

/// Operation parameters, merged flat into the command frame.
pub type Params = Map<String, Value>;

/// Success value or structured error carried by a `result` frame.
pub type Outcome = Result<Value, HassError>;

/// Code given to failed results whose error payload has no usable code.
pub const UNKNOWN_ERROR: &str = "unknown_error";

/// Structured error reported by the server in a failed `result` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassError {
    /// Machine readable error code (e.g. `unknown_command`).
    #[serde(default = "unknown_code")]
    pub code: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_placeholders: Option<Map<String, Value>>,
}

fn unknown_code() -> String {
    UNKNOWN_ERROR.to_string()
}

impl HassError {
    /// Create an error without translation metadata.
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            translation_key: None,
            translation_domain: None,
            translation_placeholders: None,
        }
    }

    /// Decode the `error` member of a failed result.
    ///
    /// Never fails: a missing or oddly shaped payload still yields an error,
    /// so the call waiting on the frame is always answered.
    pub fn from_payload(payload: Option<Value>) -> Self {
        match payload {
            None | Some(Value::Null) => {
                Self::new(UNKNOWN_ERROR, "failed without an error payload")
            }
            Some(Value::String(message)) => Self::new(UNKNOWN_ERROR, &message),
            Some(payload) => match serde_json::from_value(payload.clone()) {
                Ok(error) => error,
                Err(_) => Self::new(UNKNOWN_ERROR, &payload.to_string()),
            },
        }
    }
}

impl std::fmt::Display for HassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Convert a JSON value into command parameters.
///
/// `null` means "no parameters"; anything other than an object is rejected.
pub fn params_from_value(value: Value) -> ProtocolResult<Params> {
    match value {
        Value::Null => Ok(Params::new()),
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::InvalidParams(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// An outbound command frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: MessageId,
    pub operation: String,
    pub params: Params,
}

impl Command {
    /// Create a command, rejecting parameters that shadow envelope keys.
    pub fn new(id: MessageId, operation: &str, params: Params) -> ProtocolResult<Self> {
        if let Some(key) = RESERVED_KEYS.iter().find(|key| params.contains_key(**key)) {
            return Err(ProtocolError::ReservedKey((*key).to_string()));
        }
        Ok(Self {
            id,
            operation: operation.to_string(),
            params,
        })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        let mut frame = self.params.clone();
        frame.insert("id".to_string(), Value::from(self.id));
        frame.insert("type".to_string(), Value::from(self.operation.clone()));
        Value::Object(frame).to_string()
    }

    /// Deserialize from JSON string.
    ///
    /// Used by servers and test doubles to inspect what a client sent.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let mut frame = parse_object(json)?;
        let id = frame_id(&frame)?;
        let operation = match frame.remove("type") {
            Some(Value::String(operation)) => operation,
            _ => return Err(malformed("missing string field 'type'")),
        };
        frame.remove("id");
        Ok(Self {
            id,
            operation,
            params: frame,
        })
    }
}

/// A decoded `result` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: MessageId,
    pub outcome: Outcome,
}

impl Response {
    /// Create a successful response.
    pub fn success(id: MessageId, value: Value) -> Self {
        Self {
            id,
            outcome: Ok(value),
        }
    }

    /// Create a failed response.
    pub fn failure(id: MessageId, error: HassError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    /// Check if the server reported success.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Success value, if any.
    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    /// Server error, if any.
    pub fn error(&self) -> Option<&HassError> {
        self.outcome.as_ref().err()
    }

    /// Consume the response into its outcome.
    pub fn into_outcome(self) -> Outcome {
        self.outcome
    }

    /// Decode the success value into a concrete type.
    ///
    /// Returns `Ok(Err(error))` when the server reported a failure.
    pub fn parse<T: DeserializeOwned>(self) -> ProtocolResult<Result<T, HassError>> {
        match self.outcome {
            Ok(value) => Ok(Ok(serde_json::from_value(value)?)),
            Err(error) => Ok(Err(error)),
        }
    }
}

/// An inbound frame, routed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Reply to a command.
    Result(Response),
    /// Server push for a subscription; `id` is the subscribing command's ID.
    Event { id: MessageId, event: Value },
    /// Any other frame type. Carries no routable ID.
    Unroutable { kind: String },
}

impl Envelope {
    /// Create an event envelope.
    pub fn event(id: MessageId, event: Value) -> Self {
        Self::Event { id, event }
    }

    /// Routing identifier; [`UNROUTABLE_ID`] for unroutable frames.
    pub fn id(&self) -> MessageId {
        match self {
            Self::Result(response) => response.id,
            Self::Event { id, .. } => *id,
            Self::Unroutable { .. } => UNROUTABLE_ID,
        }
    }

    /// Wire `type` of this envelope.
    pub fn kind(&self) -> &str {
        match self {
            Self::Result(_) => "result",
            Self::Event { .. } => "event",
            Self::Unroutable { kind } => kind,
        }
    }

    /// Decode an inbound frame.
    pub fn decode(frame: &str) -> ProtocolResult<Self> {
        let mut object = parse_object(frame)?;
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(malformed("missing string field 'type'")),
        };

        match kind.as_str() {
            "result" => {
                let id = frame_id(&object)?;
                let success = object
                    .get("success")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| malformed("result frame without boolean 'success'"))?;
                let outcome = if success {
                    Ok(object.remove("result").unwrap_or(Value::Null))
                } else {
                    Err(HassError::from_payload(object.remove("error")))
                };
                Ok(Self::Result(Response { id, outcome }))
            }
            "event" => {
                let id = frame_id(&object)?;
                let event = object
                    .remove("event")
                    .ok_or_else(|| malformed("event frame without 'event'"))?;
                Ok(Self::Event { id, event })
            }
            _ => Ok(Self::Unroutable { kind }),
        }
    }

    /// Serialize to JSON string, as the server would send it.
    pub fn to_json(&self) -> String {
        let frame = match self {
            Self::Result(Response {
                id,
                outcome: Ok(value),
            }) => serde_json::json!({
                "id": id,
                "type": "result",
                "success": true,
                "result": value,
            }),
            Self::Result(Response {
                id,
                outcome: Err(error),
            }) => serde_json::json!({
                "id": id,
                "type": "result",
                "success": false,
                "error": error,
            }),
            Self::Event { id, event } => serde_json::json!({
                "id": id,
                "type": "event",
                "event": event,
            }),
            Self::Unroutable { kind } => serde_json::json!({ "type": kind }),
        };
        frame.to_string()
    }
}

fn parse_object(frame: &str) -> ProtocolResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(frame) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(malformed(&format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(malformed(&e.to_string())),
    }
}

fn frame_id(object: &Map<String, Value>) -> ProtocolResult<MessageId> {
    object
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("missing integer field 'id'"))
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::MalformedFrame(reason.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_flattens_params() {
        let params = params_from_value(json!({ "domain": "light", "service": "toggle" })).unwrap();
        let command = Command::new(7, "call_service", params).unwrap();
        let frame: Value = serde_json::from_str(&command.to_json()).unwrap();

        assert_eq!(
            frame,
            json!({ "id": 7, "type": "call_service", "domain": "light", "service": "toggle" })
        );
    }

    #[test]
    fn test_command_without_params() {
        let command = Command::new(2, "get_config", Params::new()).unwrap();
        let frame: Value = serde_json::from_str(&command.to_json()).unwrap();

        assert_eq!(frame, json!({ "id": 2, "type": "get_config" }));
    }

    #[test]
    fn test_command_rejects_reserved_keys() {
        let params = params_from_value(json!({ "id": 99 })).unwrap();
        let result = Command::new(1, "get_states", params);
        assert!(matches!(result, Err(ProtocolError::ReservedKey(key)) if key == "id"));

        let params = params_from_value(json!({ "type": "x" })).unwrap();
        let result = Command::new(1, "get_states", params);
        assert!(matches!(result, Err(ProtocolError::ReservedKey(key)) if key == "type"));
    }

    #[test]
    fn test_params_from_value() {
        assert!(params_from_value(Value::Null).unwrap().is_empty());
        assert_eq!(params_from_value(json!({ "a": 1 })).unwrap().len(), 1);
        assert!(matches!(
            params_from_value(json!([1, 2])),
            Err(ProtocolError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_command_from_json() {
        let command =
            Command::from_json(r#"{"id":4,"type":"subscribe_events","event_type":"state_changed"}"#)
                .unwrap();

        assert_eq!(command.id, 4);
        assert_eq!(command.operation, "subscribe_events");
        assert_eq!(command.params.get("event_type"), Some(&json!("state_changed")));
        assert!(!command.params.contains_key("id"));
    }

    #[test]
    fn test_decode_success_result() {
        let envelope = Envelope::decode(
            r#"{"id":2,"type":"result","success":true,"result":{"location_name":"Home"}}"#,
        )
        .unwrap();

        assert_eq!(envelope.id(), 2);
        assert_eq!(
            envelope,
            Envelope::Result(Response::success(2, json!({ "location_name": "Home" })))
        );
    }

    #[test]
    fn test_decode_success_without_result_is_null() {
        let envelope = Envelope::decode(r#"{"id":5,"type":"result","success":true}"#).unwrap();
        assert_eq!(envelope, Envelope::Result(Response::success(5, Value::Null)));
    }

    #[test]
    fn test_decode_error_result() {
        let envelope = Envelope::decode(
            r#"{"id":3,"type":"result","success":false,"error":{"code":"unknown_command","message":"Unknown command.","translation_key":"unknown","translation_placeholders":{"cmd":"x"}}}"#,
        )
        .unwrap();

        let Envelope::Result(response) = envelope else {
            panic!("Wrong variant");
        };
        let error = response.error().unwrap();
        assert_eq!(error.code, "unknown_command");
        assert_eq!(error.message, "Unknown command.");
        assert_eq!(error.translation_key.as_deref(), Some("unknown"));
        assert_eq!(
            error.translation_placeholders.as_ref().unwrap().get("cmd"),
            Some(&json!("x"))
        );
        assert!(!response.is_success());
    }

    #[test]
    fn test_decode_loosely_shaped_errors() {
        let cases = [
            (
                r#"{"id":1,"type":"result","success":false}"#,
                UNKNOWN_ERROR,
                "failed without an error payload",
            ),
            (
                r#"{"id":2,"type":"result","success":false,"error":"boom"}"#,
                UNKNOWN_ERROR,
                "boom",
            ),
            (
                r#"{"id":3,"type":"result","success":false,"error":{"code":"timeout"}}"#,
                "timeout",
                "",
            ),
            (
                r#"{"id":4,"type":"result","success":false,"error":{"message":"No code"}}"#,
                UNKNOWN_ERROR,
                "No code",
            ),
        ];

        for (frame, code, message) in cases {
            let Envelope::Result(response) = Envelope::decode(frame).unwrap() else {
                panic!("frame {} should decode to a result", frame);
            };
            let error = response.error().unwrap();
            assert_eq!(error.code, code);
            assert_eq!(error.message, message);
        }

        let envelope = Envelope::decode(
            r#"{"id":5,"type":"result","success":false,"error":{"code":"invalid_format","message":"Bad","translation_placeholders":{"count":3,"items":["a"]}}}"#,
        )
        .unwrap();
        let Envelope::Result(response) = envelope else {
            panic!("Wrong variant");
        };
        let placeholders = response
            .error()
            .and_then(|error| error.translation_placeholders.as_ref())
            .unwrap();
        assert_eq!(placeholders.get("count"), Some(&json!(3)));
        assert_eq!(placeholders.get("items"), Some(&json!(["a"])));
    }

    #[test]
    fn test_decode_event() {
        let envelope =
            Envelope::decode(r#"{"id":3,"type":"event","event":{"event_type":"x"}}"#).unwrap();
        assert_eq!(envelope, Envelope::event(3, json!({ "event_type": "x" })));
        assert_eq!(envelope.kind(), "event");
    }

    #[test]
    fn test_decode_unknown_type_is_unroutable() {
        let envelope = Envelope::decode(r#"{"id":9,"type":"pong"}"#).unwrap();
        assert_eq!(envelope.id(), UNROUTABLE_ID);
        assert_eq!(envelope.kind(), "pong");
    }

    #[test]
    fn test_decode_malformed_frames() {
        let frames = [
            "not json",
            "[1,2,3]",
            r#"{"id":1}"#,
            r#"{"id":1,"type":7}"#,
            r#"{"type":"result","success":true}"#,
            r#"{"id":1,"type":"result"}"#,
            r#"{"id":1,"type":"event"}"#,
            r#"{"id":"1","type":"event","event":{}}"#,
        ];

        for frame in frames {
            let result = Envelope::decode(frame);
            assert!(
                matches!(result, Err(ProtocolError::MalformedFrame(_))),
                "frame {} should be malformed",
                frame
            );
        }
    }

    #[test]
    fn test_canned_replies_reproduce_outcome() {
        let command = Command::new(12, "get_states", Params::new()).unwrap();
        let sent = Command::from_json(&command.to_json()).unwrap();

        let value = json!([{ "entity_id": "light.kitchen", "state": "on" }]);
        let reply = Envelope::Result(Response::success(sent.id, value.clone()));
        let decoded = Envelope::decode(&reply.to_json()).unwrap();
        assert_eq!(decoded, Envelope::Result(Response::success(12, value)));

        let mut error = HassError::new("not_found", "Entity not found");
        error.translation_domain = Some("homeassistant".to_string());
        let reply = Envelope::Result(Response::failure(sent.id, error.clone()));
        let decoded = Envelope::decode(&reply.to_json()).unwrap();
        assert_eq!(decoded, Envelope::Result(Response::failure(12, error)));
    }

    #[test]
    fn test_response_parse() {
        #[derive(Deserialize)]
        struct Config {
            version: String,
        }

        let response = Response::success(1, json!({ "version": "2024.1.0" }));
        let config: Config = response.parse().unwrap().unwrap();
        assert_eq!(config.version, "2024.1.0");

        let response = Response::failure(1, HassError::new("home_assistant_error", "boom"));
        let parsed = response.parse::<Config>().unwrap();
        assert_eq!(parsed.err().unwrap().code, "home_assistant_error");

        let response = Response::success(1, json!({ "version": 3 }));
        assert!(matches!(response.parse::<Config>(), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_hass_error_display() {
        let error = HassError::new("unauthorized", "Unauthorized");
        assert_eq!(error.to_string(), "unauthorized: Unauthorized");
    }
}
