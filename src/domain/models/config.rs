//! Engine configuration model.
//!
//! The serde tree loaded by the config loader. Settings the original system
//! kept as process-wide globals (plan-output muting, the apply retry count)
//! are threaded through here instead.

use serde::{Deserialize, Serialize};

use crate::domain::models::task::{BufferPeriodConfig, TaskConfig};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tasks to create at startup.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,

    /// Global default buffer period for dynamic tasks.
    #[serde(default)]
    pub buffer_period: BufferPeriodConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Suppress inspect-plan output in logs (read-only surfaces can be noisy).
    #[serde(default)]
    pub mute_plan_output: bool,
}

/// Apply-retry settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first apply attempt fails with a transient error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
