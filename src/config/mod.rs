//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod coordinator;
mod storage;

pub use coordinator::{CoordinatorConfig, DEFAULT_BROADCAST_TIMEOUT_MS, DEFAULT_CALL_TIMEOUT_MS};
pub use storage::{StorageType, StoreConfig};

use serde::Deserialize;

use crate::bus::TransportConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "operant.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "OPERANT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "OPERANT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "OPERANT_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `operant.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing: short timeouts, bounded retries.
    pub fn for_test() -> Self {
        Self {
            coordinator: CoordinatorConfig {
                call_timeout_ms: 2_000,
                broadcast_timeout_ms: 2_000,
                max_retries: Some(50),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
