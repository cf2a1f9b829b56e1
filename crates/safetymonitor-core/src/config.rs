//! Configuration types and storage abstraction.
//!
//! The configuration is a small tree with three sections:
//! - `server` - HTTP and discovery ports
//! - `mqtt` - broker connection used by the MQTT bridge
//! - `logging` - log level and size of the in-memory log ring
//!
//! Every field has a default, so a partial file merges over the defaults.
//! Storage is abstracted behind [`ConfigStorage`] so the web layer can
//! persist edits without knowing where the file lives.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration.
    #[error("Read error: {0}")]
    ReadError(String),

    /// Failed to write configuration.
    #[error("Write error: {0}")]
    WriteError(String),

    /// Configuration data is invalid.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Abstract configuration storage.
///
/// All methods are synchronous; the file is tiny and only touched on
/// start-up and on admin edits.
pub trait ConfigStorage: Send + Sync {
    /// Load settings, falling back to defaults for anything missing.
    fn load(&self) -> Result<Settings, ConfigError>;

    /// Persist settings.
    fn save(&self, settings: &Settings) -> Result<(), ConfigError>;
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete device configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub mqtt: MqttSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Apply the rules that hold for every saved configuration.
    ///
    /// An enabled MQTT bridge always auto-connects.
    pub fn normalized(mut self) -> Self {
        if self.mqtt.enabled {
            self.mqtt.auto_connect = true;
        }
        if self.logging.max_log_entries == 0 {
            self.logging.max_log_entries = 1;
        }
        self
    }

    /// Copy of the settings that is safe to show to admin clients.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.mqtt = copy.mqtt.redacted();
        copy
    }
}

/// Default Alpaca REST port.
pub const DEFAULT_HTTP_PORT: u16 = 11111;

/// Default UDP port Alpaca clients broadcast discovery requests to.
pub const DEFAULT_DISCOVERY_PORT: u16 = 32227;

/// HTTP and discovery ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Alpaca REST port, also advertised by discovery.
    pub http_port: u16,

    /// UDP discovery port.
    pub discovery_port: u16,

    /// Address both listeners bind to.
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// MQTT broker settings.
///
/// The bridge treats one of these as a read-only snapshot per connect call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttSettings {
    pub enabled: bool,

    /// Reconnect automatically after an unsolicited disconnect.
    pub auto_connect: bool,

    pub host: String,
    pub port: u16,

    /// Empty means no credentials.
    pub username: String,
    pub password: String,

    /// Prefix for every topic the bridge uses.
    pub base_topic: String,

    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_connect: true,
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            base_topic: "alpaca/safetymonitor".to_string(),
            client_id: "alpaca-safety-monitor".to_string(),
        }
    }
}

impl MqttSettings {
    /// `{baseTopic}/command/safe`
    pub fn command_topic(&self) -> String {
        self.topic("command/safe")
    }

    /// `{baseTopic}/{suffix}`
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_topic.trim_end_matches('/'), suffix)
    }

    /// Copy with the password blanked out.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "********".to_string();
        }
        copy
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`debug`, `info`, `warn`, `error`).
    pub level: String,

    /// Capacity of the in-memory log ring.
    pub max_log_entries: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            max_log_entries: 1000,
        }
    }
}
