//! Task lifecycle manager.
//!
//! Owns the driver registry, the state store, and the driver factory, and
//! implements task CRUD plus the core reconciliation step `task_run_now`.
//! Scheduled-task creation and deletion are pushed to the condition monitor
//! over bounded channels; the monitor owns the receiving side.

use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::Config;
use crate::domain::models::event::Event;
use crate::domain::models::task::{BufferPeriodConfig, TaskConfig};
use crate::domain::ports::{Driver, InspectPlan, RunOption, StateStore, TaskPatch};
use crate::services::driver_factory::DriverFactory;
use crate::services::driver_registry::DriverRegistry;
use crate::services::retry::RetryPolicy;

/// Granularity of the active-flag busy-wait.
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Capacity of the created-schedule and delete push channels.
const SCHEDULE_CHANNEL_CAPACITY: usize = 10;

/// Capacity of the test-mode run-notification channel.
const RAN_NOTIFY_CAPACITY: usize = 32;

/// Tunable timings and toggles for the manager.
///
/// The defaults are the production values; tests compress the render
/// durations without changing the loop's semantics.
#[derive(Debug, Clone)]
pub struct TasksManagerConfig {
    /// Cadence of `render_template` calls while waiting for a new task's
    /// dependencies to arrive.
    pub render_poll_interval: Duration,
    /// When to fire the one-shot notifier override for conditions that block
    /// waiting on catalog-service data.
    pub render_override_after: Duration,
    /// Hard ceiling on the readiness loop.
    pub render_timeout: Duration,
    /// Global default buffer period applied to dynamic tasks.
    pub buffer_default: BufferPeriodConfig,
    /// Once mode: block until templates render, and apply without retry.
    pub once: bool,
    /// Suppress plan text in logs.
    pub mute_plan_output: bool,
}

impl Default for TasksManagerConfig {
    fn default() -> Self {
        Self {
            render_poll_interval: Duration::from_millis(50),
            render_override_after: Duration::from_secs(30),
            render_timeout: Duration::from_secs(60),
            buffer_default: BufferPeriodConfig::default(),
            once: false,
            mute_plan_output: false,
        }
    }
}

impl TasksManagerConfig {
    /// Derive manager settings from the engine configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_default: config.buffer_period,
            mute_plan_output: config.mute_plan_output,
            ..Self::default()
        }
    }
}

enum RunOutcome {
    Applied,
    NotRendered,
}

/// Task CRUD, run-now, and the channels feeding the condition monitor.
pub struct TasksManager {
    registry: Arc<DriverRegistry>,
    state: Arc<dyn StateStore>,
    factory: DriverFactory,
    retry: RetryPolicy,
    config: TasksManagerConfig,
    schedule_start_tx: mpsc::Sender<String>,
    schedule_start_rx: StdMutex<Option<mpsc::Receiver<String>>>,
    delete_tx: mpsc::Sender<String>,
    delete_rx: StdMutex<Option<mpsc::Receiver<String>>>,
    ran_notify_tx: StdRwLock<Option<mpsc::Sender<String>>>,
}

impl TasksManager {
    pub fn new(
        registry: Arc<DriverRegistry>,
        state: Arc<dyn StateStore>,
        factory: DriverFactory,
        retry: RetryPolicy,
        config: TasksManagerConfig,
    ) -> Self {
        let (schedule_start_tx, schedule_start_rx) = mpsc::channel(SCHEDULE_CHANNEL_CAPACITY);
        let (delete_tx, delete_rx) = mpsc::channel(SCHEDULE_CHANNEL_CAPACITY);
        Self {
            registry,
            state,
            factory,
            retry,
            config,
            schedule_start_tx,
            schedule_start_rx: StdMutex::new(Some(schedule_start_rx)),
            delete_tx,
            delete_rx: StdMutex::new(Some(delete_rx)),
            ran_notify_tx: StdRwLock::new(None),
        }
    }

    /// Create drivers for every configured task and register them.
    ///
    /// Buffer periods are forwarded to the watcher once all tasks exist, so
    /// a partially-initialized task set never debounces.
    pub async fn init(
        &self,
        token: &CancellationToken,
        task_configs: &[TaskConfig],
    ) -> DomainResult<()> {
        for raw in task_configs {
            let mut config = raw.clone();
            config.validate()?;
            config.finalize(&self.config.buffer_default);

            let driver = self.create_task(token, &config).await?;
            self.registry.add(&config.name, driver)?;
            self.state.set_task(config).await?;
        }
        self.registry.set_buffer_periods();
        info!(count = self.registry.len(), "tasks initialized");
        Ok(())
    }

    /// Config of a single task.
    pub async fn task(&self, name: &str) -> DomainResult<TaskConfig> {
        self.state
            .get_task(name)
            .await?
            .ok_or_else(|| DomainError::NotFound(name.to_string()))
    }

    /// Snapshot of all task configs.
    pub async fn tasks(&self) -> DomainResult<Vec<TaskConfig>> {
        self.state.get_all_tasks().await
    }

    /// Name of the task depending on a template, if any.
    ///
    /// The registry is authoritative; this facade exists for layering only.
    pub fn task_by_template(&self, template_id: &str) -> Option<String> {
        self.registry
            .get_by_template(template_id)
            .map(|(name, _)| name)
    }

    pub fn task_count(&self) -> usize {
        self.registry.len()
    }

    /// Names of all registered scheduled tasks.
    pub fn scheduled_task_names(&self) -> Vec<String> {
        self.registry
            .map()
            .into_iter()
            .filter(|(_, driver)| driver.task().is_scheduled())
            .map(|(name, _)| name)
            .collect()
    }

    /// Create a task at runtime.
    pub async fn task_create(
        &self,
        token: &CancellationToken,
        config: TaskConfig,
    ) -> DomainResult<TaskConfig> {
        let config = self.create_and_register(token, config).await?;
        if config.is_scheduled() && self.schedule_start_tx.send(config.name.clone()).await.is_err()
        {
            warn!(task_name = %config.name, "created-schedule channel closed");
        }
        Ok(config)
    }

    /// Create a task and immediately run it.
    pub async fn task_create_and_run(
        &self,
        token: &CancellationToken,
        config: TaskConfig,
    ) -> DomainResult<TaskConfig> {
        let config = self.task_create(token, config).await?;
        self.task_run_now(token, &config.name).await?;
        Ok(config)
    }

    /// Mark a task for deletion and return immediately.
    ///
    /// The entry is removed asynchronously once any in-flight run drains;
    /// the condition monitor is told over the delete channel so it can stop
    /// a scheduled task's timer.
    pub async fn task_delete(&self, token: &CancellationToken, name: &str) -> DomainResult<()> {
        if self.registry.is_marked_for_deletion(name) {
            debug!(task_name = name, "task already marked for deletion");
            return Ok(());
        }
        if !self.registry.mark_for_deletion(name) {
            debug!(task_name = name, "delete of unknown task is a no-op");
            return Ok(());
        }
        if self.registry.is_active(name) {
            info!(
                task_name = name,
                "task is running; deletion deferred until the run completes"
            );
        }
        if self.delete_tx.send(name.to_string()).await.is_err() {
            debug!(task_name = name, "delete channel closed");
        }

        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);
        let token = token.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                // A run that claimed the flag before the mark landed still
                // finishes; new runs are refused by the mark.
                if !registry.is_active(&name) && registry.delete(&name).is_ok() {
                    break;
                }
                tokio::select! {
                    () = token.cancelled() => return,
                    () = sleep(ACTIVE_POLL_INTERVAL) => {}
                }
            }
            if let Err(err) = state.delete_task(&name).await {
                error!(task_name = %name, error = %err, "failed to remove task from state");
            }
            if let Err(err) = state.delete_task_events(&name).await {
                error!(task_name = %name, error = %err, "failed to purge task events");
            }
            info!(task_name = %name, "task deleted");
        });
        Ok(())
    }

    /// Dry-run a task config without registering it.
    pub async fn task_inspect(
        &self,
        token: &CancellationToken,
        mut config: TaskConfig,
    ) -> DomainResult<InspectPlan> {
        config.validate()?;
        config.finalize(&self.config.buffer_default);

        // Ephemeral driver: rendered for inspection, then torn down.
        let driver = self.create_task(token, &config).await?;
        let result = driver.inspect_task().await;
        driver.destroy_task().await;

        let plan = result?;
        if !self.config.mute_plan_output {
            info!(
                task_name = %config.name,
                changes = plan.changes_present,
                "inspection plan:\n{}",
                plan.plan
            );
        }
        Ok(plan)
    }

    /// Patch a task through its driver.
    ///
    /// Fails with `Conflict` while a run is in flight. The active flag is
    /// held for the duration so a concurrent trigger cannot interleave with
    /// the update. Non-inspect enabled changes are persisted.
    pub async fn task_update(&self, name: &str, patch: TaskPatch) -> DomainResult<InspectPlan> {
        let Some(driver) = self.registry.get(name) else {
            return Err(DomainError::NotFound(name.to_string()));
        };
        if !self.registry.set_active(name) {
            return Err(DomainError::conflict(
                name,
                "is currently running; try again when the run completes",
            ));
        }

        let result = self.apply_update(&driver, name, patch).await;
        self.registry.set_inactive(name);
        result
    }

    async fn apply_update(
        &self,
        driver: &Arc<dyn Driver>,
        name: &str,
        patch: TaskPatch,
    ) -> DomainResult<InspectPlan> {
        let plan = driver.update_task(patch).await?;

        let inspect_only = patch.run == Some(RunOption::Inspect);
        if !inspect_only {
            if let Some(enabled) = patch.enabled {
                if let Some(mut config) = self.state.get_task(name).await? {
                    config.enabled = enabled;
                    self.state.set_task(config).await?;
                }
            }
        }

        if !self.config.mute_plan_output && !plan.plan.is_empty() {
            info!(task_name = name, "update plan:\n{}", plan.plan);
        }
        Ok(plan)
    }

    /// Run a task now: render, then apply, with at most one run in flight
    /// per task.
    pub async fn task_run_now(&self, token: &CancellationToken, name: &str) -> DomainResult<()> {
        let Some(driver) = self.registry.get(name) else {
            return Err(DomainError::NotFound(name.to_string()));
        };
        if self.registry.is_marked_for_deletion(name) {
            debug!(task_name = name, "skipping run of task marked for deletion");
            return Ok(());
        }
        if !driver.task().enabled {
            debug!(task_name = name, "task is disabled, skipping run");
            return Ok(());
        }

        self.wait_for_task_inactive(token, name).await?;

        // Re-read after the claim: an update or delete may have landed while
        // this run waited for the flag.
        let task = driver.task();
        if self.registry.is_marked_for_deletion(name) || !task.enabled {
            self.registry.set_inactive(name);
            debug!(task_name = name, "task changed while waiting, skipping run");
            return Ok(());
        }

        let scheduled = task.is_scheduled();
        let mut event = Event::begin(name).with_task(&task);
        let outcome = self.render_and_apply(token, &driver).await;
        self.registry.set_inactive(name);

        match outcome {
            Ok(RunOutcome::Applied) => {
                event.end(Ok(()));
                self.store_event(event).await;
                info!(task_name = name, "task run complete");
                self.notify_ran(name).await;
                Ok(())
            }
            Ok(RunOutcome::NotRendered) => {
                if scheduled {
                    // A cron tick with nothing rendered still records an
                    // event so schedule liveness is observable.
                    event.end(Ok(()));
                    self.store_event(event).await;
                }
                debug!(task_name = name, "template not rendered, run deferred");
                Ok(())
            }
            Err(err) => {
                event.end(Err(&err));
                self.store_event(event).await;
                error!(task_name = name, error = %err, "task run failed");
                Err(err)
            }
        }
    }

    /// Take the receiver of created-schedule notifications. One consumer.
    pub fn watch_created_schedule_tasks(&self) -> Option<mpsc::Receiver<String>> {
        self.schedule_start_rx
            .lock()
            .expect("schedule channel lock poisoned")
            .take()
    }

    /// Take the receiver of task-deletion notifications. One consumer.
    pub fn watch_deleted_schedule_task(&self) -> Option<mpsc::Receiver<String>> {
        self.delete_rx
            .lock()
            .expect("delete channel lock poisoned")
            .take()
    }

    /// Enable the test-mode side channel: every successful run emits the
    /// task name. Callers must drain continuously.
    pub fn enable_task_ran_notify(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(RAN_NOTIFY_CAPACITY);
        *self
            .ran_notify_tx
            .write()
            .expect("notify channel lock poisoned") = Some(tx);
        rx
    }

    /// Validate, finalize, build, and register one task.
    async fn create_and_register(
        &self,
        token: &CancellationToken,
        mut config: TaskConfig,
    ) -> DomainResult<TaskConfig> {
        config.validate()?;
        if self.registry.get(&config.name).is_some() {
            return Err(DomainError::AlreadyExists(config.name));
        }
        config.finalize(&self.config.buffer_default);

        let driver = self.create_task(token, &config).await?;
        if !config.is_scheduled() {
            driver.set_buffer_period();
        }
        self.registry.add(&config.name, driver)?;
        self.state.set_task(config.clone()).await?;
        info!(task_name = %config.name, condition = config.condition.kind(), "task created");
        Ok(config)
    }

    /// Build a driver and wait for its template to become renderable.
    ///
    /// Renders at `render_poll_interval` cadence. At `render_override_after`
    /// the notifier is overridden once: catalog-service conditions can
    /// otherwise block forever waiting for service data. At `render_timeout`
    /// the task is destroyed and `RenderTimeout` returned. A successful
    /// render overrides the notifier once more to suppress the spurious
    /// trigger the initial render queued.
    async fn create_task(
        &self,
        token: &CancellationToken,
        config: &TaskConfig,
    ) -> DomainResult<Arc<dyn Driver>> {
        let driver = self.factory.make(config).await?;
        let start = Instant::now();
        let mut overridden = false;

        loop {
            let rendered = tokio::select! {
                () = token.cancelled() => {
                    driver.destroy_task().await;
                    return Err(DomainError::Canceled);
                }
                result = driver.render_template() => match result {
                    Ok(rendered) => rendered,
                    Err(err) => {
                        driver.destroy_task().await;
                        return Err(err);
                    }
                },
            };
            if rendered {
                driver.override_notifier();
                return Ok(driver);
            }

            if start.elapsed() >= self.config.render_timeout {
                driver.destroy_task().await;
                return Err(DomainError::RenderTimeout {
                    name: config.name.clone(),
                    elapsed_secs: self.config.render_timeout.as_secs(),
                });
            }
            if !overridden && start.elapsed() >= self.config.render_override_after {
                debug!(task_name = %config.name, "overriding notifier for blocked condition");
                driver.override_notifier();
                overridden = true;
            }

            tokio::select! {
                () = token.cancelled() => {
                    driver.destroy_task().await;
                    return Err(DomainError::Canceled);
                }
                () = sleep(self.config.render_poll_interval) => {}
            }
        }
    }

    /// Busy-wait until the task's active flag can be claimed.
    ///
    /// Claiming is test-and-set, so two waiters cannot both win. Acquisition
    /// order between waiters is not guaranteed.
    async fn wait_for_task_inactive(
        &self,
        token: &CancellationToken,
        name: &str,
    ) -> DomainResult<()> {
        loop {
            if self.registry.set_active(name) {
                return Ok(());
            }
            if self.registry.get(name).is_none() {
                return Err(DomainError::NotFound(name.to_string()));
            }
            tokio::select! {
                () = token.cancelled() => return Err(DomainError::Canceled),
                () = sleep(ACTIVE_POLL_INTERVAL) => {}
            }
        }
    }

    async fn render_and_apply(
        &self,
        token: &CancellationToken,
        driver: &Arc<dyn Driver>,
    ) -> DomainResult<RunOutcome> {
        loop {
            let rendered = tokio::select! {
                () = token.cancelled() => return Err(DomainError::Canceled),
                result = driver.render_template() => result?,
            };
            if rendered {
                break;
            }
            if !self.config.once {
                return Ok(RunOutcome::NotRendered);
            }
            // Once mode blocks until the template is ready so a single pass
            // over the task set applies everything.
            tokio::select! {
                () = token.cancelled() => return Err(DomainError::Canceled),
                () = sleep(self.config.render_poll_interval) => {}
            }
        }

        let apply = async {
            if self.config.once {
                driver.apply_task().await
            } else {
                self.retry.execute(|| driver.apply_task()).await
            }
        };
        tokio::select! {
            () = token.cancelled() => Err(DomainError::Canceled),
            result = apply => result,
        }?;
        Ok(RunOutcome::Applied)
    }

    async fn store_event(&self, event: Event) {
        if let Err(err) = self.state.add_task_event(event).await {
            error!(error = %err, "failed to store run event");
        }
    }

    async fn notify_ran(&self, name: &str) {
        let tx = self
            .ran_notify_tx
            .read()
            .expect("notify channel lock poisoned")
            .clone();
        if let Some(tx) = tx {
            if tx.send(name.to_string()).await.is_err() {
                debug!("task-ran notify receiver dropped");
            }
        }
    }
}
