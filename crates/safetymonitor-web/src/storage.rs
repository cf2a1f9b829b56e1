//! JSON file configuration storage.
//!
//! Settings live in a single pretty-printed JSON file (`config.json` in the
//! working directory by default). A missing file is created with defaults
//! on first load; a partial file merges over the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use safetymonitor_core::{ConfigError, ConfigStorage, Settings};
use tracing::{debug, info};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// [`ConfigStorage`] backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    path: PathBuf,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStorage {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_FILE)
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load(&self) -> Result<Settings, ConfigError> {
        if !self.path.exists() {
            let settings = Settings::default();
            self.save(&settings)?;
            info!(path = %self.path.display(), "Created default configuration");
            return Ok(settings);
        }

        let raw = fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", self.path.display(), e)))?;
        let settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::InvalidData(format!("{}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), "Loaded configuration");
        Ok(settings.normalized())
    }

    fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&settings.clone().normalized())
            .map_err(|e| ConfigError::InvalidData(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(format!("{}: {}", parent.display(), e)))?;
        }
        fs::write(&self.path, json)
            .map_err(|e| ConfigError::WriteError(format!("{}: {}", self.path.display(), e)))
    }
}
