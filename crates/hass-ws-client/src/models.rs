//! Payload models for the commands the client wraps.
//!
//! Home Assistant adds fields between releases, so every model tolerates
//! missing fields and most keep unknown ones in an `extra` map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// An entity as returned by `get_states` and carried in `state_changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassEntity {
    pub entity_id: String,
    /// Usually a string such as `"on"` or `"21.5"`.
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub attributes: EntityAttributes,
    #[serde(default)]
    pub last_changed: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EntityContext>,
}

impl HassEntity {
    /// Domain part of the entity ID (`light` in `light.kitchen`).
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }

    /// State as a string, if it is one.
    pub fn state_str(&self) -> Option<&str> {
        self.state.as_str()
    }
}

/// Entity attributes. Integration specific attributes land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_features: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumed_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Origin of a state change or event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityContext {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Units configured for the installation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitSystem {
    pub length: String,
    pub mass: String,
    pub volume: String,
    pub temperature: String,
    pub pressure: String,
    pub wind_speed: String,
    pub accumulated_precipitation: String,
}

/// Run state of the Home Assistant core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreState {
    NotRunning,
    Starting,
    Running,
    Stopping,
    FinalWrite,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Result of `get_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HassConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub unit_system: UnitSystem,
    pub location_name: String,
    pub time_zone: String,
    pub components: Vec<String>,
    pub config_dir: String,
    pub allowlist_external_dirs: Vec<String>,
    pub allowlist_external_urls: Vec<String>,
    pub version: String,
    pub config_source: String,
    pub recovery_mode: bool,
    pub safe_mode: bool,
    pub state: CoreState,
    pub external_url: Option<String>,
    pub internal_url: Option<String>,
    pub currency: String,
    pub country: Option<String>,
    pub language: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A parameter accepted by a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A service description from `get_services`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HassService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, ServiceField>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A frontend panel from `get_panels`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HassPanel {
    pub component_name: String,
    pub icon: Option<String>,
    pub title: Option<String>,
    pub config: Option<Value>,
    pub url_path: String,
    pub require_admin: bool,
    pub config_panel_domain: Option<String>,
}

/// One ID or a list of IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Targets {
    fn from(id: &str) -> Self {
        Self::One(id.to_string())
    }
}

impl From<Vec<String>> for Targets {
    fn from(ids: Vec<String>) -> Self {
        Self::Many(ids)
    }
}

/// What a service call acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Targets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Targets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_id: Option<Targets>,
}

impl ServiceTarget {
    /// Target entities.
    pub fn entities(ids: impl Into<Targets>) -> Self {
        Self {
            entity_id: Some(ids.into()),
            ..Self::default()
        }
    }

    /// Target devices.
    pub fn devices(ids: impl Into<Targets>) -> Self {
        Self {
            device_id: Some(ids.into()),
            ..Self::default()
        }
    }

    /// Target areas.
    pub fn areas(ids: impl Into<Targets>) -> Self {
        Self {
            area_id: Some(ids.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_id.is_none() && self.device_id.is_none() && self.area_id.is_none()
    }
}

/// An event pushed on a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_fired: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EntityContext>,
}

impl HassEvent {
    /// The new state carried by a `state_changed` event.
    pub fn new_state(&self) -> Option<HassEntity> {
        self.data
            .get("new_state")
            .and_then(|state| serde_json::from_value(state.clone()).ok())
    }
}
