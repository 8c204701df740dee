//! Driver port.
//!
//! A driver executes one task's infrastructure module: it renders the task's
//! template from cached dependency values, applies the rendered plan, and
//! supports dry-run inspection. Concrete drivers live outside this crate; the
//! engine consumes them through this trait.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::task::Task;

/// Extra action requested alongside a task update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOption {
    /// Apply the updated task immediately.
    Now,
    /// Dry-run the updated task without persisting or applying.
    Inspect,
}

/// Partial update applied to a task through its driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskPatch {
    pub enabled: Option<bool>,
    pub run: Option<RunOption>,
}

/// Result of a dry-run.
#[derive(Debug, Clone, Default)]
pub struct InspectPlan {
    pub changes_present: bool,
    pub plan: String,
    pub url: Option<String>,
}

/// Executor abstraction for a task's infrastructure module.
///
/// Errors are either transient (`DomainError::Transient`, retried for apply)
/// or fatal (surfaced to the caller).
#[async_trait]
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// One-shot preparation of the module working directory.
    async fn init_task(&self) -> DomainResult<()>;

    /// Attempt to render the task's template from currently-cached dependency
    /// values. `Ok(false)` without an error means dependencies are still
    /// being fetched and the call should be repeated.
    async fn render_template(&self) -> DomainResult<bool>;

    /// Idempotent execution of the rendered plan. May be long-running.
    async fn apply_task(&self) -> DomainResult<()>;

    /// Dry-run the task.
    async fn inspect_task(&self) -> DomainResult<InspectPlan>;

    /// Toggle enabled and optionally trigger a run or an inspection.
    async fn update_task(&self, patch: TaskPatch) -> DomainResult<InspectPlan>;

    /// Cleanup after an initialization failure or for an ephemeral driver.
    async fn destroy_task(&self);

    /// Suppress the next template notification.
    fn override_notifier(&self);

    /// Forward the task's buffer period to the watcher for its templates.
    fn set_buffer_period(&self);

    /// IDs of the templates this task depends on.
    fn template_ids(&self) -> Vec<String>;

    /// The task this driver executes.
    fn task(&self) -> Task;
}
