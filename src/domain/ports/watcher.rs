//! Watcher port.
//!
//! The watcher is a dependency-aware template engine: it tracks the catalog
//! values each template depends on and pushes template IDs when those values
//! change, with optional per-template min/max debouncing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::DomainResult;

/// Dependency-change notification source.
///
/// Externally single-writer: only the condition monitor's watch task calls
/// `watch`. `size` may be read from any task.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Push changed template IDs into `tx` until an error occurs or the token
    /// is canceled. A bounded `tx` provides back-pressure: the watcher blocks
    /// on send rather than dropping notifications.
    async fn watch(&self, token: CancellationToken, tx: mpsc::Sender<String>) -> DomainResult<()>;

    /// Block until the next dependency change, one-shot.
    async fn wait(&self, token: CancellationToken) -> DomainResult<()>;

    /// Number of dependencies currently tracked.
    fn size(&self) -> usize;

    /// Stop watching and release resources.
    fn stop(&self);

    /// Apply a debounce window to the given templates.
    fn set_buffer_period(&self, min: Duration, max: Duration, template_ids: &[String]);
}
