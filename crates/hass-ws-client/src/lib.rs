//! Typed client for the Home Assistant WebSocket API.
//!
//! Wraps a [`hass_ws_core::Session`] with accessors for the common commands
//! and decodes their payloads into the models in [`models`].

mod client;
mod error;
pub mod models;

pub use client::{EventListener, HassClient, CALL_SERVICE, GET_CONFIG, GET_PANELS, GET_SERVICES, GET_STATES};
pub use error::{ClientError, ClientResult};
pub use models::{
    CoreState, EntityAttributes, EntityContext, HassConfig, HassEntity, HassEvent, HassPanel,
    HassService, ServiceField, ServiceTarget, Targets, UnitSystem,
};
