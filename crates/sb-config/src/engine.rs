//! Engine configuration with TOML support
//!
//! ```toml
//! name = "orders"
//! shutdown_timeout_ms = 5000
//!
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [components.scp]
//! strictHostKeyChecking = "no"
//! knownHostsFile = "/etc/ssh/ssh_known_hosts"
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use sb_common::ConfigurationError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    /// Grace period for in-flight work and open sessions during shutdown
    pub shutdown_timeout_ms: u64,
    pub logging: LoggingConfig,
    /// Free-form settings per component scheme
    pub components: HashMap<String, toml::Table>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "switchboard".to_string(),
            shutdown_timeout_ms: 10_000,
            logging: LoggingConfig::default(),
            components: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(content).map_err(|e| ConfigurationError::invalid(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let config = toml::from_str(&content).map_err(|e| ConfigurationError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        info!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Apply `SB_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("SB_ENGINE_NAME") {
            self.name = name;
        }

        if let Some(raw) = lookup("SB_SHUTDOWN_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => self.shutdown_timeout_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid SB_SHUTDOWN_TIMEOUT_MS"),
            }
        }

        if let Some(level) = lookup("SB_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("SB_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => warn!(value = %format, "Ignoring invalid SB_LOG_FORMAT"),
            }
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Settings table for one component scheme
    pub fn component(&self, scheme: &str) -> Option<&toml::Table> {
        self.components.get(scheme)
    }

    /// Install the global tracing subscriber described by `[logging]`
    pub fn init_logging(&self) -> bool {
        sb_common::logging::init(&self.logging.level, self.logging.format == LogFormat::Json)
    }
}
