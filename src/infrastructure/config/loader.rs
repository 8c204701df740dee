use anyhow::{Context as _, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid max_retries: {0}. Must be at most 8")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid buffer period: min ({0}s) must not exceed max ({1}s)"
    )]
    InvalidBufferPeriod(u64, u64),

    #[error("Task config error: {0}")]
    TaskConfig(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. infrasync.yaml in the working directory
    /// 3. Environment variables (INFRASYNC_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("infrasync.yaml"))
            .merge(Env::prefixed("INFRASYNC_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.retry.max_retries > crate::services::retry::MAX_RETRIES {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.buffer_period.enabled && config.buffer_period.min_secs > config.buffer_period.max_secs
        {
            return Err(ConfigError::InvalidBufferPeriod(
                config.buffer_period.min_secs,
                config.buffer_period.max_secs,
            ));
        }

        for task in &config.tasks {
            task.validate()
                .map_err(|err| ConfigError::TaskConfig(err.to_string()))?;
        }

        Ok(())
    }
}
