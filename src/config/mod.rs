//! Application configuration.
//!
//! Loaded from YAML files or environment variables into a single `Config`
//! struct consumed at wiring time.

use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SYNDIC_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SYNDIC";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SYNDIC_LOG";

/// Configuration errors surfaced at load or validation time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Federation controller tuning.
    pub federation: FederationConfig,
    /// Local cohort identity.
    pub cohort: CohortConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `SYNDIC_CONFIG` environment variable (if set)
    /// 4. Environment variables with `SYNDIC` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.federation.validate()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

/// Tuning for the federation controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Maximum concurrent member calls per run.
    pub fan_out_limit: usize,
    /// Per-member call timeout in milliseconds.
    pub member_timeout_ms: u64,
    /// Consecutive timeouts before a member is demoted to unreachable.
    pub unreachable_after_timeouts: u32,
    /// Page limit applied when a caller does not provide one.
    pub default_page_limit: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            fan_out_limit: 8,
            member_timeout_ms: 5_000,
            unreachable_after_timeouts: 3,
            default_page_limit: 100,
        }
    }
}

impl FederationConfig {
    /// Per-member call timeout as a `Duration`.
    pub fn member_timeout(&self) -> Duration {
        Duration::from_millis(self.member_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fan_out_limit == 0 {
            return Err(ConfigError::Invalid(
                "federation.fan_out_limit must be at least 1".to_string(),
            ));
        }
        if self.member_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "federation.member_timeout_ms must be nonzero".to_string(),
            ));
        }
        if self.default_page_limit == 0 {
            return Err(ConfigError::Invalid(
                "federation.default_page_limit must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity of the local server within its cohort.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    /// Name this server presents in authorization checks and logs.
    pub server_name: String,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            server_name: "local".to_string(),
        }
    }
}
