//! Configuration, paths and logging for hass-ws tools.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_LOG_LEVEL, ENV_LOG_LEVEL, ENV_SERVER, ENV_TOKEN};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogFormat, ENV_LOG_FORMAT};
pub use paths::Paths;
