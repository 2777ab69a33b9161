//! Configuration for matterwire services.
//!
//! TOML settings merged with `MATTERWIRE_*` environment overrides, and
//! translation to `matterwire_core::BridgeConfig`. Also loads the cluster
//! schema file the converter works from.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use matterwire_core::{BridgeConfig, PollerConfig, ScannerConfig, SchemaError, SchemaRegistry};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no schema path configured")]
    NoSchemaPath,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("schema loading failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Capacity of the bridge's event channel.
    #[serde(default = "default_event_channel_size")]
    pub event_channel_size: usize,

    /// Cluster schema JSON file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,

    #[serde(default)]
    pub poller: PollerSettings,

    #[serde(default)]
    pub scanner: ScannerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            event_channel_size: default_event_channel_size(),
            schema_path: None,
            poller: PollerSettings::default(),
            scanner: ScannerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollerSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_interval_secs")]
    pub max_initial_jitter_secs: u64,

    #[serde(default = "default_inter_node_delay_ms")]
    pub inter_node_delay_ms: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_initial_jitter_secs: default_interval_secs(),
            inter_node_delay_ms: default_inter_node_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScannerSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_inter_node_delay_ms")]
    pub inter_node_delay_ms: u64,

    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            inter_node_delay_ms: default_inter_node_delay_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

fn default_event_channel_size() -> usize {
    256
}
fn default_interval_secs() -> u64 {
    30
}
fn default_inter_node_delay_ms() -> u64 {
    1000
}
fn default_discovery_timeout_ms() -> u64 {
    10_000
}

impl Settings {
    /// Reject values the background loops can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("poller.interval_secs", self.poller.interval_secs),
            ("scanner.interval_secs", self.scanner.interval_secs),
            ("scanner.discovery_timeout_ms", self.scanner.discovery_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Validation {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.event_channel_size == 0 {
            return Err(ConfigError::Validation {
                field: "event_channel_size".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Translate into the runtime config the bridge takes.
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            poller: PollerConfig {
                interval: Duration::from_secs(self.poller.interval_secs),
                max_initial_jitter: Duration::from_secs(self.poller.max_initial_jitter_secs),
                inter_node_delay: Duration::from_millis(self.poller.inter_node_delay_ms),
            },
            scanner: ScannerConfig {
                interval: Duration::from_secs(self.scanner.interval_secs),
                inter_node_delay: Duration::from_millis(self.scanner.inter_node_delay_ms),
                discovery_timeout: Duration::from_millis(self.scanner.discovery_timeout_ms),
            },
            event_channel_size: self.event_channel_size,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "matterwire", "matterwire").map_or_else(
        || PathBuf::from(".").join("matterwire.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load settings from the canonical path + environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&config_path())
}

/// Load settings from `path` + environment. A missing file yields the
/// defaults (still subject to environment overrides).
///
/// Nested keys use a double underscore:
/// `MATTERWIRE_POLLER__INTERVAL_SECS=60`.
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MATTERWIRE_").split("__"));

    let settings: Settings = figment.extract()?;
    settings.validate()?;
    debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize settings to TOML at `path`, creating parent directories.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Schema ──────────────────────────────────────────────────────────

/// Read and intern a cluster schema JSON file.
pub fn load_schema(path: &Path) -> Result<SchemaRegistry, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let registry = SchemaRegistry::from_json(&text)?;
    debug!(path = %path.display(), clusters = registry.cluster_count(), "schema loaded");
    Ok(registry)
}

/// Load the schema named by `settings.schema_path`.
pub fn load_configured_schema(settings: &Settings) -> Result<SchemaRegistry, ConfigError> {
    let path = settings.schema_path.as_deref().ok_or(ConfigError::NoSchemaPath)?;
    load_schema(path)
}
