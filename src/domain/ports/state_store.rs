//! State store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::event::Event;
use crate::domain::models::task::TaskConfig;

/// Persistence interface for task configs and run-event history.
///
/// Reads return snapshots (owned clones) so callers never alias internal
/// state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a task config by name.
    async fn get_task(&self, name: &str) -> DomainResult<Option<TaskConfig>>;

    /// Create or replace a task config.
    async fn set_task(&self, config: TaskConfig) -> DomainResult<()>;

    /// Delete a task config by name.
    async fn delete_task(&self, name: &str) -> DomainResult<()>;

    /// Snapshot of all task configs.
    async fn get_all_tasks(&self) -> DomainResult<Vec<TaskConfig>>;

    /// Append a run event to the task's bounded history.
    async fn add_task_event(&self, event: Event) -> DomainResult<()>;

    /// Run events for one task, newest first.
    async fn get_task_events(&self, task_name: &str) -> DomainResult<Vec<Event>>;

    /// Purge all events for a task.
    async fn delete_task_events(&self, task_name: &str) -> DomainResult<()>;
}
