//! Configuration management for the activity limiter.
//!
//! Configuration is read once at startup. Action overrides, role multipliers
//! and store settings are fixed for the life of the process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{ActionOverride, ActionType, RoleMultipliers, DEFAULT_NAMESPACE};

/// Prefix for environment variable overrides, e.g. `ACTIVITY_LIMITER__STORE__URL`.
pub const ENV_PREFIX: &str = "ACTIVITY_LIMITER";

/// Main configuration for the limiter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Centralized store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// In-process sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Per-role quota multipliers
    #[serde(default)]
    pub roles: RoleMultipliers,

    /// Per-action overrides of the built-in table
    #[serde(default)]
    pub actions: HashMap<ActionType, ActionOverride>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Centralized store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL, e.g. `redis://127.0.0.1:6379`. Without one only the
    /// in-process store is used.
    #[serde(default)]
    pub url: Option<String>,

    /// Namespace prefixed to every counter key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Whether the store may run server-side scripts
    #[serde(default = "default_scripting")]
    pub scripting: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            namespace: default_namespace(),
            scripting: default_scripting(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_scripting() -> bool {
    true
}

/// Sweep settings for the in-process store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Records older than this many longest windows are dropped
    #[serde(default = "default_eviction_factor")]
    pub eviction_factor: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            eviction_factor: default_eviction_factor(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_eviction_factor() -> u32 {
    2
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LimiterConfig {
    /// Load configuration from a file, with environment overrides applied.
    ///
    /// The format is chosen from the file extension (YAML, TOML or JSON).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        if !path.exists() {
            return Err(LimiterError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(format!("failed to load {}: {}", path.display(), e)))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))
    }
}
