//! Wire format for the Home Assistant WebSocket API.
//!
//! This crate provides:
//! - Command frames (`{id, type, ...params}`) sent by the client
//! - Envelope decoding for `result` and `event` frames pushed by the server
//! - Authentication handshake frames

mod auth;
mod envelope;
mod error;

pub use auth::AuthMessage;
pub use envelope::{
    params_from_value, Command, Envelope, HassError, MessageId, Outcome, Params, Response,
    RESERVED_KEYS, UNKNOWN_ERROR, UNROUTABLE_ID,
};
pub use error::{ProtocolError, ProtocolResult};
