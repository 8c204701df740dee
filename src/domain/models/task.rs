//! Task domain model.
//!
//! A task binds a set of watched catalog queries (or a cron schedule) to an
//! infrastructure module. Tasks are described by a `TaskConfig` (the mutable,
//! serde-facing form) and finalized into an immutable `Task` when a driver is
//! built for them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// What causes a task to run.
///
/// A task with a `Schedule` condition is driven exclusively by cron ticks and
/// never by watcher notifications; every other variant is change-driven via
/// the watcher and never runs on a cron tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Run on a cron schedule.
    Schedule { cron: String },
    /// Run when any of the named catalog services change.
    Services {
        #[serde(default)]
        names: Vec<String>,
        #[serde(default)]
        regexp: Option<String>,
        #[serde(default)]
        datacenter: Option<String>,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        cts_user_defined_meta: HashMap<String, String>,
    },
    /// Run when the set of registered catalog services changes.
    Catalog {
        #[serde(default)]
        regexp: Option<String>,
        #[serde(default)]
        datacenter: Option<String>,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        node_meta: HashMap<String, String>,
    },
    /// Run when a key-value path changes.
    ConsulKv {
        path: String,
        #[serde(default)]
        recurse: bool,
        #[serde(default)]
        datacenter: Option<String>,
        #[serde(default)]
        namespace: Option<String>,
    },
}

impl Condition {
    /// Whether this condition is cron-driven.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Schedule { .. })
    }

    /// Parse the cron expression of a schedule condition.
    ///
    /// Returns `InvalidConfig` for a malformed expression and
    /// `UnexpectedCondition` when called on a dynamic condition.
    pub fn cron_schedule(&self, task_name: &str) -> DomainResult<cron::Schedule> {
        match self {
            Self::Schedule { cron } => Ok(cron::Schedule::from_str(cron)?),
            _ => Err(DomainError::UnexpectedCondition {
                name: task_name.to_string(),
                reason: "condition is not cron-driven".to_string(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schedule { .. } => "schedule",
            Self::Services { .. } => "services",
            Self::Catalog { .. } => "catalog",
            Self::ConsulKv { .. } => "consul_kv",
        }
    }
}

/// Debounce window applied to a task's templates in the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPeriodConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_buffer_min_secs")]
    pub min_secs: u64,
    #[serde(default = "default_buffer_max_secs")]
    pub max_secs: u64,
}

impl Default for BufferPeriodConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_secs: default_buffer_min_secs(),
            max_secs: default_buffer_max_secs(),
        }
    }
}

impl BufferPeriodConfig {
    /// Finalized `{min, max}` window, or `None` when buffering is disabled.
    pub fn period(&self) -> Option<BufferPeriod> {
        if !self.enabled {
            return None;
        }
        Some(BufferPeriod {
            min: Duration::from_secs(self.min_secs),
            max: Duration::from_secs(self.max_secs),
        })
    }
}

/// Finalized buffer period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPeriod {
    pub min: Duration,
    pub max: Duration,
}

fn default_true() -> bool {
    true
}

fn default_buffer_min_secs() -> u64 {
    5
}

fn default_buffer_max_secs() -> u64 {
    20
}

/// A provider reference from a task config: `name` or `name.alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderId {
    pub name: String,
    pub alias: Option<String>,
}

impl ProviderId {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let mut parts = raw.splitn(2, '.');
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(DomainError::InvalidConfig(format!(
                "invalid provider id '{raw}'"
            )));
        }
        let alias = parts.next().map(str::to_string);
        if let Some(ref a) = alias {
            if a.is_empty() {
                return Err(DomainError::InvalidConfig(format!(
                    "invalid provider id '{raw}': empty alias"
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            alias,
        })
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}.{}", self.name, alias),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A resolved provider block ready to hand to a driver.
///
/// Arguments may originate from static config or from dynamic expressions
/// resolved through the provider resolver at driver-build time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderBlock {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
}

/// Serde-facing task description, as it appears in config files and API
/// payloads. The task name is the primary key across all surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub module: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    /// Provider metadata from required-providers blocks, keyed by provider
    /// name (e.g. `source`).
    #[serde(default)]
    pub provider_info: HashMap<String, serde_json::Value>,
    /// Module input variables.
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Environment for the driver process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub buffer_period: Option<BufferPeriodConfig>,
    pub condition: Condition,
}

impl TaskConfig {
    /// Validate the config, returning `InvalidConfig` on the first problem.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.is_empty() {
            return Err(DomainError::InvalidConfig(
                "task name cannot be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DomainError::InvalidConfig(format!(
                "task name '{}' may only contain letters, digits, '_' and '-'",
                self.name
            )));
        }
        if self.module.is_empty() {
            return Err(DomainError::InvalidConfig(format!(
                "task '{}' is missing a module",
                self.name
            )));
        }

        let mut seen: HashMap<String, Option<String>> = HashMap::new();
        for raw in &self.providers {
            let id = ProviderId::parse(raw)?;
            if let Some(prev_alias) = seen.get(&id.name) {
                if *prev_alias != id.alias {
                    return Err(DomainError::InvalidConfig(format!(
                        "task '{}' references provider '{}' with conflicting aliases",
                        self.name, id.name
                    )));
                }
                return Err(DomainError::InvalidConfig(format!(
                    "task '{}' references provider '{}' more than once",
                    self.name, id.name
                )));
            }
            seen.insert(id.name.clone(), id.alias.clone());
        }

        if let Some(bp) = &self.buffer_period {
            if bp.enabled && bp.min_secs > bp.max_secs {
                return Err(DomainError::InvalidConfig(format!(
                    "task '{}' buffer period min ({}s) exceeds max ({}s)",
                    self.name, bp.min_secs, bp.max_secs
                )));
            }
        }

        // Cron expressions fail fast at config time, not first tick.
        if let Condition::Schedule { cron } = &self.condition {
            cron::Schedule::from_str(cron)?;
        }

        Ok(())
    }

    /// Fill unset fields from global defaults.
    ///
    /// Scheduled tasks never get a buffer period: buffering debounces watcher
    /// notifications, which scheduled tasks do not consume.
    pub fn finalize(&mut self, buffer_default: &BufferPeriodConfig) {
        if self.condition.is_scheduled() {
            self.buffer_period = Some(BufferPeriodConfig {
                enabled: false,
                ..*buffer_default
            });
        } else if self.buffer_period.is_none() {
            self.buffer_period = Some(*buffer_default);
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.condition.is_scheduled()
    }
}

/// Immutable task descriptor, built by the driver factory from a finalized
/// `TaskConfig` plus resolved provider blocks. Owned by the driver.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub module: String,
    pub version: Option<String>,
    /// Ordered provider IDs, as configured.
    pub providers: Vec<ProviderId>,
    pub provider_blocks: Vec<ProviderBlock>,
    pub provider_info: HashMap<String, serde_json::Value>,
    pub env: HashMap<String, String>,
    pub services: Vec<String>,
    pub variables: HashMap<String, serde_json::Value>,
    pub working_dir: Option<PathBuf>,
    pub buffer_period: Option<BufferPeriod>,
    pub condition: Condition,
}

impl Task {
    /// Build the immutable descriptor. The config must already be validated
    /// and finalized.
    pub fn from_config(
        config: &TaskConfig,
        provider_blocks: Vec<ProviderBlock>,
    ) -> DomainResult<Self> {
        let providers = config
            .providers
            .iter()
            .map(|raw| ProviderId::parse(raw))
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(Self {
            name: config.name.clone(),
            description: config.description.clone(),
            enabled: config.enabled,
            module: config.module.clone(),
            version: config.version.clone(),
            providers,
            provider_blocks,
            provider_info: config.provider_info.clone(),
            env: config.env.clone(),
            services: config.services.clone(),
            variables: config.variables.clone(),
            working_dir: config.working_dir.clone(),
            buffer_period: config.buffer_period.as_ref().and_then(BufferPeriodConfig::period),
            condition: config.condition.clone(),
        })
    }

    pub fn is_scheduled(&self) -> bool {
        self.condition.is_scheduled()
    }

    /// Provider names in display form, for event records.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(ToString::to_string).collect()
    }
}
