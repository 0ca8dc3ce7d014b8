//! Configuration management.
//!
//! Settings come from `<config dir>/hass-ws/config.json` when it exists,
//! then from environment variables, then from command-line flags applied by
//! the caller.

use crate::{CoreError, CoreResult, Paths};
use hass_ws_core::{SessionConfig, UnsubscribePolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding the server address.
pub const ENV_SERVER: &str = "HASS_SERVER";

/// Environment variable overriding the access token.
pub const ENV_TOKEN: &str = "HASS_TOKEN";

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "HASS_WS_LOG_LEVEL";

/// Tool configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Home Assistant address, e.g. `http://homeassistant.local:8123`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Long-lived access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// What cancelling a subscription sends to the server.
    #[serde(default)]
    pub unsubscribe_policy: UnsubscribePolicy,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            access_token: None,
            log_level: default_log_level(),
            unsubscribe_policy: UnsubscribePolicy::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("log_level", &self.log_level)
            .field("unsubscribe_policy", &self.unsubscribe_policy)
            .finish()
    }
}

impl Config {
    /// Load the config file if present, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override settings from `HASS_SERVER`, `HASS_TOKEN` and
    /// `HASS_WS_LOG_LEVEL`.
    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override settings from a variable lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(server) = lookup(ENV_SERVER) {
            self.server = Some(server);
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.access_token = Some(token);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    /// Build a session configuration, checking that a usable server address
    /// and an access token are set.
    pub fn session_config(&self) -> CoreResult<SessionConfig> {
        let server = self
            .server
            .as_deref()
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .ok_or_else(|| {
                CoreError::Config(format!("server is not set (use --server or {ENV_SERVER})"))
            })?;
        Url::parse(server)?;

        let token = self
            .access_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                CoreError::Config(format!(
                    "access token is not set (use --token or {ENV_TOKEN})"
                ))
            })?;

        Ok(SessionConfig::new(server, token).with_unsubscribe_policy(self.unsubscribe_policy))
    }
}
