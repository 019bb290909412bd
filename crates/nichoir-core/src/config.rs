use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NichoirError, Result};
use crate::types::LogLevel;

/// Top-level configuration for the Nichoir ingestion service.
///
/// Loaded from `~/.nichoir/config.toml` by default. Every field has a
/// default so partial files are accepted; `validate` rejects values the
/// broker link or the persister cannot work with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NichoirConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl NichoirConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NichoirConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Check every field the runtime depends on.
    pub fn validate(&self) -> Result<()> {
        let broker = &self.broker;
        if broker.host.trim().is_empty() {
            return Err(NichoirError::Config("broker.host must not be empty".into()));
        }
        if broker.port == 0 {
            return Err(NichoirError::Config("broker.port must be > 0".into()));
        }
        if !(5..=3600).contains(&broker.keep_alive_secs) {
            return Err(NichoirError::Config(format!(
                "broker.keep_alive_secs must be within 5..=3600, got {}",
                broker.keep_alive_secs
            )));
        }
        if broker.qos > 2 {
            return Err(NichoirError::Config(format!(
                "broker.qos must be 0, 1 or 2, got {}",
                broker.qos
            )));
        }
        if broker.client_id.len() > 36 {
            return Err(NichoirError::Config(
                "broker.client_id must be at most 36 characters".into(),
            ));
        }
        for (name, topic) in [
            ("broker.image_topic", &broker.image_topic),
            ("broker.telemetry_topic", &broker.telemetry_topic),
        ] {
            if topic.trim().is_empty() {
                return Err(NichoirError::Config(format!("{name} must not be empty")));
            }
            if topic.contains('+') || topic.contains('#') {
                return Err(NichoirError::Config(format!(
                    "{name} must be a concrete topic, not a filter: {topic}"
                )));
            }
        }
        if broker.image_topic == broker.telemetry_topic {
            return Err(NichoirError::Config(
                "broker.image_topic and broker.telemetry_topic must differ".into(),
            ));
        }

        let reconnect = &broker.reconnect;
        if reconnect.initial_delay_ms == 0 || reconnect.max_delay_ms < reconnect.initial_delay_ms
        {
            return Err(NichoirError::Config(
                "broker.reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms".into(),
            ));
        }
        if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
            return Err(NichoirError::Config(format!(
                "broker.reconnect.multiplier must be a finite number >= 1.0, got {}",
                reconnect.multiplier
            )));
        }

        let ext = &self.storage.image_extension;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(NichoirError::Config(format!(
                "storage.image_extension must be alphanumeric, got '{ext}'"
            )));
        }
        if self.storage.database_file.trim().is_empty() {
            return Err(NichoirError::Config(
                "storage.database_file must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Data directory with `~/` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }

    /// Image directory; relative values are resolved against the data directory.
    pub fn image_dir(&self) -> PathBuf {
        self.resolve_in_data_dir(&self.storage.image_dir)
    }

    /// SQLite database path; relative values are resolved against the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.resolve_in_data_dir(&self.storage.database_file)
    }

    fn resolve_in_data_dir(&self, value: &str) -> PathBuf {
        let path = expand_home(value);
        if path.is_absolute() {
            path
        } else {
            self.data_dir().join(path)
        }
    }
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Base directory for the database and, by default, the images.
    pub data_dir: String,
    pub log_level: LogLevel,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.nichoir/data".to_string(),
            log_level: LogLevel::Info,
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Client identifier; a random one is generated when empty.
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Subscription QoS (0, 1 or 2).
    pub qos: u8,
    /// Largest accepted incoming packet. Camera frames need headroom here.
    pub max_packet_size: usize,
    /// Topic carrying raw image bytes.
    pub image_topic: String,
    /// Topic carrying UTF-8 decimal readings.
    pub telemetry_topic: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            keep_alive_secs: 60,
            username: None,
            password: None,
            qos: 0,
            max_packet_size: 10 * 1024 * 1024,
            image_topic: "nichoir/image".to_string(),
            telemetry_topic: "nichoir/battery".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Backoff policy applied after an established connection drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before giving up. 0 disables reconnection.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

/// Image and database storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving image files.
    pub image_dir: String,
    /// SQLite database file name or path.
    pub database_file: String,
    /// Extension given to generated image file names.
    pub image_extension: String,
    /// Comment attached to every ingested image record.
    pub default_comment: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: "images".to_string(),
            database_file: "nichoir.db".to_string(),
            image_extension: "jpg".to_string(),
            default_comment: Some("Image auto".to_string()),
        }
    }
}

/// Read-side viewer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}
