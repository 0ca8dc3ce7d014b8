//! File system paths.

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Directory name below the platform config directory.
const APP_DIR_NAME: &str = "hass-ws";

/// Resolves where hass-ws keeps its files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (`<config dir>/hass-ws`)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at the platform config directory
    /// (e.g. `~/.config/hass-ws` on Linux).
    pub fn new() -> CoreResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CoreError::Path("Could not determine config directory".to_string()))?;

        Ok(Self {
            base_dir: config_dir.join(APP_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the config file path (`<base>/config.json`).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Ensure the base directory exists.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}
