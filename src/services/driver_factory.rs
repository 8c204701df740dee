//! Driver factory.
//!
//! Turns a finalized task config into an initialized driver: provider blocks
//! are resolved in parallel (each bounded by a per-block timeout), the
//! immutable task value is built, and the driver is constructed and
//! initialized. A failed initialization destroys the half-built task before
//! the error surfaces.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::task::{ProviderBlock, ProviderId, Task, TaskConfig};
use crate::domain::ports::{Driver, ProviderResolver};

/// Per-provider-block resolution ceiling.
pub const PROVIDER_BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Constructor for concrete drivers, injected by the embedding application.
pub type DriverBuilder = Arc<dyn Fn(Task) -> DomainResult<Arc<dyn Driver>> + Send + Sync>;

/// Builds initialized drivers for tasks.
pub struct DriverFactory {
    builder: DriverBuilder,
    resolver: Arc<dyn ProviderResolver>,
    provider_timeout: Duration,
}

impl DriverFactory {
    pub fn new(builder: DriverBuilder, resolver: Arc<dyn ProviderResolver>) -> Self {
        Self {
            builder,
            resolver,
            provider_timeout: PROVIDER_BLOCK_TIMEOUT,
        }
    }

    /// Override the per-block resolution timeout.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Build and initialize a driver for a validated, finalized task config.
    pub async fn make(&self, config: &TaskConfig) -> DomainResult<Arc<dyn Driver>> {
        let blocks = self.load_provider_blocks(config).await?;
        let task = Task::from_config(config, blocks)?;

        let driver = (self.builder)(task)?;
        if let Err(err) = driver.init_task().await {
            driver.destroy_task().await;
            return Err(err);
        }
        debug!(task_name = %config.name, "driver initialized");
        Ok(driver)
    }

    /// Resolve every provider block concurrently, each bounded by the
    /// per-block timeout. If any block fails, the last error observed wins.
    async fn load_provider_blocks(&self, config: &TaskConfig) -> DomainResult<Vec<ProviderBlock>> {
        let ids = config
            .providers
            .iter()
            .map(|raw| ProviderId::parse(raw))
            .collect::<DomainResult<Vec<_>>>()?;

        let futures = ids.into_iter().map(|id| {
            let raw_block = ProviderBlock {
                args: config
                    .provider_info
                    .get(&id.name)
                    .and_then(|v| v.as_object())
                    .map(|obj| obj.clone().into_iter().collect())
                    .unwrap_or_default(),
                name: id.name,
                alias: id.alias,
            };
            async move {
                let display = match &raw_block.alias {
                    Some(alias) => format!("{}.{alias}", raw_block.name),
                    None => raw_block.name.clone(),
                };
                match tokio::time::timeout(self.provider_timeout, self.resolver.resolve(&raw_block))
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(_) => Err(DomainError::Fatal(format!(
                        "timed out resolving provider block '{display}' after {:?}",
                        self.provider_timeout
                    ))),
                }
            }
        });

        let mut blocks = Vec::new();
        let mut last_err = None;
        for result in join_all(futures).await {
            match result {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    warn!(task_name = %config.name, error = %err, "provider block failed to load");
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(blocks),
        }
    }
}
