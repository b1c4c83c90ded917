//! Hierarchical configuration loading: defaults, then `quantlab.yaml`,
//! then `QUANTLAB_*` environment variables, then a validation pass.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Sandbox interpreter cannot be empty")]
    EmptyInterpreter,

    #[error("Invalid sandbox stdout cap: {0}. Must be at least 4096 bytes")]
    InvalidStdoutCap(usize),

    #[error("Invalid sandbox concurrency cap: {0}. Must be between 1 and 64")]
    InvalidSandboxCap(usize),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the default file path.
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from("quantlab.yaml")
    }

    pub fn load_from(path: &str) -> Result<Config, ConfigError> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("QUANTLAB_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
        match config.logging.format.as_str() {
            "json" | "pretty" => {}
            other => return Err(ConfigError::InvalidLogFormat(other.to_string())),
        }
        if config.sandbox.interpreter.is_empty() {
            return Err(ConfigError::EmptyInterpreter);
        }
        if config.sandbox.stdout_byte_cap < 4096 {
            return Err(ConfigError::InvalidStdoutCap(config.sandbox.stdout_byte_cap));
        }
        let sandbox_cap = config.orchestrator.max_concurrent_sandboxes;
        if sandbox_cap == 0 || sandbox_cap > 64 {
            return Err(ConfigError::InvalidSandboxCap(sandbox_cap));
        }
        Ok(())
    }
}
