//! Condition monitor.
//!
//! The long-running event loop of the engine: translates watcher
//! notifications (template IDs whose dependencies changed) and cron ticks
//! into task runs, and reacts to runtime task creation and deletion pushed
//! over the manager's channels.
//!
//! Errors inside spawned run tasks are logged and absorbed so one task's
//! failure never stalls the loop; the single exception is a cron parse
//! failure, which terminates that scheduled task only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::Watcher;
use crate::services::tasks_manager::TasksManager;

/// Dependency count above which the periodic size log becomes a warning.
pub const DEP_SIZE_WARNING: usize = 1000;

/// Slack added to the watcher channel beyond the initial task count.
const WATCHER_CHANNEL_SLACK: usize = 10;

/// How many loop iterations between dependency-size log lines.
const DEP_SIZE_LOG_CADENCE: u64 = 50;

type StopChannels = Arc<StdMutex<HashMap<String, mpsc::Sender<()>>>>;

/// Event loop turning dependency changes and cron ticks into task runs.
pub struct ConditionMonitor {
    tasks: Arc<TasksManager>,
    watcher: Arc<dyn Watcher>,
}

impl ConditionMonitor {
    pub fn new(tasks: Arc<TasksManager>, watcher: Arc<dyn Watcher>) -> Self {
        Self { tasks, watcher }
    }

    /// Run the monitor until the token is canceled.
    ///
    /// Returns `Canceled` on shutdown; any other exit is a wiring error
    /// (the manager's channels were already consumed).
    pub async fn run(&self, token: CancellationToken) -> DomainResult<()> {
        let capacity = self.tasks.task_count() + WATCHER_CHANNEL_SLACK;
        let (watcher_tx, mut watcher_rx) = mpsc::channel::<String>(capacity);

        // The watch task is the single writer into the watcher. It only
        // exits on cancellation; other errors are logged and it re-invokes.
        let mut watch_handle = {
            let watcher = Arc::clone(&self.watcher);
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    match watcher.watch(token.clone(), watcher_tx.clone()).await {
                        Err(DomainError::Canceled) => break,
                        Err(err) => error!(error = %err, "watcher error, restarting watch"),
                        Ok(()) => {}
                    }
                    if token.is_cancelled() {
                        break;
                    }
                }
                debug!("watch task exited");
            })
        };

        let mut created_rx = self
            .tasks
            .watch_created_schedule_tasks()
            .ok_or_else(|| DomainError::Fatal("created-schedule channel already taken".into()))?;
        let mut deleted_rx = self
            .tasks
            .watch_deleted_schedule_task()
            .ok_or_else(|| DomainError::Fatal("delete channel already taken".into()))?;

        let stop_channels: StopChannels = Arc::new(StdMutex::new(HashMap::new()));

        // Tasks configured before the loop started get their schedules going
        // here; later ones arrive over the created channel.
        for name in self.tasks.scheduled_task_names() {
            self.start_schedule(&token, &stop_channels, name);
        }

        let mut iteration: u64 = 0;
        loop {
            iteration += 1;
            if iteration % DEP_SIZE_LOG_CADENCE == 0 {
                self.log_dep_size();
            }

            tokio::select! {
                Some(template_id) = watcher_rx.recv() => {
                    match self.tasks.task_by_template(&template_id) {
                        Some(name) => {
                            let tasks = Arc::clone(&self.tasks);
                            let token = token.clone();
                            tokio::spawn(async move {
                                if let Err(err) = run_dynamic_task(&tasks, &token, &name).await {
                                    error!(task_name = %name, error = %err, "dynamic task run failed");
                                }
                            });
                        }
                        None => {
                            debug!(template_id = %template_id, "template does not map to a task");
                        }
                    }
                }
                Some(name) = created_rx.recv() => {
                    // A re-created task replaces its predecessor's timer.
                    let prior = stop_channels
                        .lock()
                        .expect("stop channel lock poisoned")
                        .remove(&name);
                    if let Some(stop) = prior {
                        let _ = stop.try_send(());
                    }
                    self.start_schedule(&token, &stop_channels, name);
                }
                Some(name) = deleted_rx.recv() => {
                    let stop = stop_channels
                        .lock()
                        .expect("stop channel lock poisoned")
                        .remove(&name);
                    if let Some(stop) = stop {
                        debug!(task_name = %name, "stopping schedule for deleted task");
                        let _ = stop.try_send(());
                    }
                }
                () = token.cancelled() => {
                    if let Err(err) = (&mut watch_handle).await {
                        warn!(error = %err, "watch task panicked");
                    }
                    self.watcher.stop();
                    // Scheduled tasks share the token, so their stop
                    // channels need no signal.
                    stop_channels
                        .lock()
                        .expect("stop channel lock poisoned")
                        .clear();
                    info!("condition monitor stopped");
                    return Err(DomainError::Canceled);
                }
            }
        }
    }

    /// Block on watcher waits until the token is canceled.
    ///
    /// Used by once and inspect controllers, which drive rendering
    /// themselves and only need the dependency cache kept warm.
    pub async fn watch_dep(&self, token: CancellationToken) -> DomainResult<()> {
        loop {
            tokio::select! {
                () = token.cancelled() => return Err(DomainError::Canceled),
                result = self.watcher.wait(token.clone()) => match result {
                    Ok(()) => debug!(size = self.watcher.size(), "dependency change observed"),
                    Err(DomainError::Canceled) => return Err(DomainError::Canceled),
                    Err(err) => error!(error = %err, "error waiting on dependencies"),
                },
            }
        }
    }

    fn start_schedule(
        &self,
        token: &CancellationToken,
        stop_channels: &StopChannels,
        name: String,
    ) {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        stop_channels
            .lock()
            .expect("stop channel lock poisoned")
            .insert(name.clone(), stop_tx.clone());

        let tasks = Arc::clone(&self.tasks);
        let token = token.clone();
        let stop_channels = Arc::clone(stop_channels);
        tokio::spawn(async move {
            if let Err(err) = run_scheduled_task(&tasks, &token, &name, stop_rx).await {
                error!(task_name = %name, error = %err, "scheduled task stopped");
            }
            // Drop this task's own entry, but never a successor's: a
            // re-created task already replaced the map slot with its own
            // channel before this one was signaled.
            let mut channels = stop_channels.lock().expect("stop channel lock poisoned");
            if channels
                .get(&name)
                .is_some_and(|current| current.same_channel(&stop_tx))
            {
                channels.remove(&name);
            }
        });
    }

    fn log_dep_size(&self) {
        let size = self.watcher.size();
        if size > DEP_SIZE_WARNING {
            warn!(
                size,
                limit = DEP_SIZE_WARNING,
                "dependency set is unexpectedly large; catalog queries may be too broad"
            );
        } else {
            debug!(size, "watcher dependency size");
        }
    }
}

/// Run a dynamic task in response to a dependency change.
async fn run_dynamic_task(
    tasks: &Arc<TasksManager>,
    token: &CancellationToken,
    name: &str,
) -> DomainResult<()> {
    let config = match tasks.task(name).await {
        Ok(config) => config,
        Err(DomainError::NotFound(_)) => {
            debug!(task_name = name, "task removed before its run started");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    if config.is_scheduled() {
        return Err(DomainError::UnexpectedCondition {
            name: name.to_string(),
            reason: "scheduled tasks do not run on dependency changes".to_string(),
        });
    }

    debug!(task_name = name, "dependency change triggered run");
    tasks.task_run_now(token, name).await
}

/// Drive one scheduled task: sleep until the next cron fire time, run, and
/// repeat until stopped, canceled, or the task disappears.
async fn run_scheduled_task(
    tasks: &Arc<TasksManager>,
    token: &CancellationToken,
    name: &str,
    mut stop_rx: mpsc::Receiver<()>,
) -> DomainResult<()> {
    let config = match tasks.task(name).await {
        Ok(config) => config,
        Err(_) => {
            debug!(task_name = name, "scheduled task no longer exists");
            return Ok(());
        }
    };
    // A parse failure terminates this task only; the monitor keeps running.
    let schedule = config.condition.cron_schedule(name)?;
    info!(task_name = name, "schedule started");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            info!(task_name = name, "schedule has no future fire times");
            return Ok(());
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(task_name = name, next = %next, "waiting for next scheduled run");

        tokio::select! {
            () = sleep(wait) => {
                if tasks.task(name).await.is_err() {
                    debug!(task_name = name, "task deleted, stopping schedule");
                    return Ok(());
                }
                if let Err(err) = tasks.task_run_now(token, name).await {
                    // Keep the schedule alive; the next tick may succeed.
                    error!(task_name = name, error = %err, "scheduled run failed");
                }
            }
            _ = stop_rx.recv() => {
                debug!(task_name = name, "schedule stop signal received");
                return Ok(());
            }
            () = token.cancelled() => return Ok(()),
        }
    }
}
