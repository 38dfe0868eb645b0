//! Process configuration
//!
//! One JSON file configures the store client, the HTTP server and the
//! defaults of the watched-update scenario. Every field has a default, so `{}`
//! is a valid configuration.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_server::HttpServerConfig;
use crate::observability::Severity;
use crate::store::StoreConfig;
use crate::txn::RaceWindow;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Config file already exists: {0}")]
    AlreadyExists(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Defaults for the watched-update scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Key watched and raced (default: "a")
    #[serde(default = "default_watch_key")]
    pub watch_key: String,

    /// Delay before the mutator writes (default: 1000)
    #[serde(default = "default_mutator_delay_ms")]
    pub mutator_delay_ms: u64,

    /// How long the session holds before submitting (default: 5000)
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
}

fn default_watch_key() -> String {
    "a".to_string()
}

fn default_mutator_delay_ms() -> u64 {
    1000
}

fn default_hold_ms() -> u64 {
    5000
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            watch_key: default_watch_key(),
            mutator_delay_ms: default_mutator_delay_ms(),
            hold_ms: default_hold_ms(),
        }
    }
}

impl ScenarioConfig {
    /// Timed race window built from the configured durations
    pub fn race_window(&self) -> RaceWindow {
        RaceWindow::Timed {
            mutator_delay: Duration::from_millis(self.mutator_delay_ms),
            hold: Duration::from_millis(self.hold_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default)]
    pub scenario: ScenarioConfig,

    /// Minimum log severity (default: "INFO")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            http: HttpServerConfig::default(),
            scenario: ScenarioConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.store.validate().map_err(ConfigError::Invalid)?;
        if self.scenario.watch_key.is_empty() {
            return Err(ConfigError::Invalid("scenario.watch_key must not be empty".into()));
        }
        self.severity()?;
        Ok(())
    }

    pub fn severity(&self) -> ConfigResult<Severity> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log_level '{}'", self.log_level)))
    }

    /// Write the default configuration to `path`. Never overwrites.
    pub fn write_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.display().to_string()));
        }
        let config = AppConfig::default();
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(path, content).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }
}
