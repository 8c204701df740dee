//! Shared test doubles and harness wiring.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;

use infrasync::domain::models::task::{Condition, TaskConfig};
use infrasync::domain::ports::{Driver, InspectPlan, ProviderResolver, RunOption, TaskPatch};
use infrasync::{
    DomainError, DomainResult, DriverFactory, DriverRegistry, InMemoryStateStore, RetryPolicy,
    Task, TasksManager, TasksManagerConfig, Watcher,
};

// ========================
// Mock driver
// ========================

/// Observable state of one mock driver, shared with the test body.
#[derive(Debug)]
pub struct MockDriverState {
    pub init_calls: AtomicUsize,
    pub render_calls: AtomicUsize,
    pub apply_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub override_calls: AtomicUsize,
    pub buffer_calls: AtomicUsize,
    /// Render returns false until this many render calls have happened.
    /// Negative means render forever returns false.
    render_ready_after: AtomicIsize,
    /// Scripted apply failures, consumed front to back.
    apply_failures: StdMutex<Vec<DomainError>>,
    /// Wall-clock span of every apply call, for overlap assertions.
    pub apply_spans: StdMutex<Vec<(Instant, Instant)>>,
    apply_delay: Duration,
}

impl MockDriverState {
    fn new(render_ready_after: isize, apply_delay: Duration) -> Self {
        Self {
            init_calls: AtomicUsize::new(0),
            render_calls: AtomicUsize::new(0),
            apply_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            override_calls: AtomicUsize::new(0),
            buffer_calls: AtomicUsize::new(0),
            render_ready_after: AtomicIsize::new(render_ready_after),
            apply_failures: StdMutex::new(Vec::new()),
            apply_spans: StdMutex::new(Vec::new()),
            apply_delay,
        }
    }

    pub fn fail_next_applies(&self, errors: Vec<DomainError>) {
        *self.apply_failures.lock().unwrap() = errors;
    }

    /// Change render behavior on an existing driver; negative means the
    /// template never renders again.
    pub fn set_render_ready_after(&self, n: isize) {
        self.render_calls.store(0, Ordering::SeqCst);
        self.render_ready_after.store(n, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockDriver {
    task: StdMutex<Task>,
    pub state: Arc<MockDriverState>,
}

impl MockDriver {
    fn new(task: Task, render_ready_after: isize, apply_delay: Duration) -> Self {
        Self {
            task: StdMutex::new(task),
            state: Arc::new(MockDriverState::new(render_ready_after, apply_delay)),
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn init_task(&self) -> DomainResult<()> {
        self.state.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn render_template(&self) -> DomainResult<bool> {
        let calls = self.state.render_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let ready_after = self.state.render_ready_after.load(Ordering::SeqCst);
        if ready_after < 0 {
            return Ok(false);
        }
        Ok(calls as isize > ready_after)
    }

    async fn apply_task(&self) -> DomainResult<()> {
        let start = Instant::now();
        tokio::time::sleep(self.state.apply_delay).await;
        self.state.apply_calls.fetch_add(1, Ordering::SeqCst);

        let result = {
            let mut failures = self.state.apply_failures.lock().unwrap();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        };
        self.state
            .apply_spans
            .lock()
            .unwrap()
            .push((start, Instant::now()));
        result
    }

    async fn inspect_task(&self) -> DomainResult<InspectPlan> {
        Ok(InspectPlan {
            changes_present: true,
            plan: format!("plan for {}", self.task.lock().unwrap().name),
            url: None,
        })
    }

    async fn update_task(&self, patch: TaskPatch) -> DomainResult<InspectPlan> {
        if let Some(enabled) = patch.enabled {
            self.task.lock().unwrap().enabled = enabled;
        }
        match patch.run {
            Some(RunOption::Now) => self.apply_task().await?,
            Some(RunOption::Inspect) | None => {}
        }
        self.inspect_task().await
    }

    async fn destroy_task(&self) {
        self.state.destroy_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn override_notifier(&self) {
        self.state.override_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn set_buffer_period(&self) {
        self.state.buffer_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn template_ids(&self) -> Vec<String> {
        vec![format!("tmpl_{}", self.task.lock().unwrap().name)]
    }

    fn task(&self) -> Task {
        self.task.lock().unwrap().clone()
    }
}

/// Creates mock drivers on demand and retains handles so tests can observe
/// per-driver state after the factory built them.
pub struct MockDriverFarm {
    drivers: StdMutex<HashMap<String, Arc<MockDriver>>>,
    render_ready_after: AtomicIsize,
    apply_delay: StdMutex<Duration>,
}

impl MockDriverFarm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            drivers: StdMutex::new(HashMap::new()),
            render_ready_after: AtomicIsize::new(0),
            apply_delay: StdMutex::new(Duration::ZERO),
        })
    }

    /// Drivers built after this call return false from render for the first
    /// `n` calls; negative `n` means never render.
    pub fn set_render_ready_after(&self, n: isize) {
        self.render_ready_after.store(n, Ordering::SeqCst);
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock().unwrap() = delay;
    }

    pub fn builder(self: &Arc<Self>) -> infrasync::services::DriverBuilder {
        let farm = Arc::clone(self);
        Arc::new(move |task: Task| {
            let driver = Arc::new(MockDriver::new(
                task,
                farm.render_ready_after.load(Ordering::SeqCst),
                *farm.apply_delay.lock().unwrap(),
            ));
            farm.drivers
                .lock()
                .unwrap()
                .insert(driver.task().name, Arc::clone(&driver));
            Ok(driver as Arc<dyn Driver>)
        })
    }

    /// Most recent driver built for a task.
    pub fn driver(&self, name: &str) -> Arc<MockDriver> {
        self.drivers
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("no driver built for '{name}'"))
    }
}

// ========================
// Mock watcher
// ========================

pub struct MockWatcher {
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: TokioMutex<mpsc::UnboundedReceiver<String>>,
    size: AtomicUsize,
    stopped: AtomicBool,
}

impl MockWatcher {
    pub fn new() -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            queue_tx,
            queue_rx: TokioMutex::new(queue_rx),
            size: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    /// Simulate a dependency change for a template.
    pub fn push(&self, template_id: &str) {
        self.queue_tx
            .send(template_id.to_string())
            .expect("watch task gone");
    }

    pub fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::SeqCst);
    }
}

#[async_trait]
impl Watcher for MockWatcher {
    async fn watch(&self, token: CancellationToken, tx: mpsc::Sender<String>) -> DomainResult<()> {
        let mut queue = self.queue_rx.lock().await;
        loop {
            tokio::select! {
                () = token.cancelled() => return Err(DomainError::Canceled),
                id = queue.recv() => match id {
                    Some(id) => {
                        if tx.send(id).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn wait(&self, token: CancellationToken) -> DomainResult<()> {
        token.cancelled().await;
        Err(DomainError::Canceled)
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn set_buffer_period(&self, _min: Duration, _max: Duration, _template_ids: &[String]) {}
}

// ========================
// Resolver + harness
// ========================

pub struct PassthroughResolver;

#[async_trait]
impl ProviderResolver for PassthroughResolver {
    async fn resolve(
        &self,
        block: &infrasync::domain::models::ProviderBlock,
    ) -> DomainResult<infrasync::domain::models::ProviderBlock> {
        Ok(block.clone())
    }
}

pub struct Harness {
    pub farm: Arc<MockDriverFarm>,
    pub watcher: Arc<MockWatcher>,
    pub registry: Arc<DriverRegistry>,
    pub state: Arc<InMemoryStateStore>,
    pub manager: Arc<TasksManager>,
}

/// Wire a full manager over mock ports.
pub fn harness(config: TasksManagerConfig) -> Harness {
    harness_with_retry(config, RetryPolicy::new(0))
}

pub fn harness_with_retry(config: TasksManagerConfig, retry: RetryPolicy) -> Harness {
    let farm = MockDriverFarm::new();
    let watcher = MockWatcher::new();
    let registry = Arc::new(DriverRegistry::new());
    let state = Arc::new(InMemoryStateStore::new());
    let factory = DriverFactory::new(farm.builder(), Arc::new(PassthroughResolver));
    let manager = Arc::new(TasksManager::new(
        Arc::clone(&registry),
        Arc::clone(&state) as Arc<dyn infrasync::StateStore>,
        factory,
        retry,
        config,
    ));
    Harness {
        farm,
        watcher,
        registry,
        state,
        manager,
    }
}

/// Manager timings compressed for tests; semantics unchanged.
pub fn fast_config() -> TasksManagerConfig {
    TasksManagerConfig {
        render_poll_interval: Duration::from_millis(5),
        render_override_after: Duration::from_millis(150),
        render_timeout: Duration::from_millis(300),
        ..TasksManagerConfig::default()
    }
}

// ========================
// Task config builders
// ========================

pub fn dynamic_task(name: &str, services: &[&str]) -> TaskConfig {
    TaskConfig {
        name: name.to_string(),
        description: None,
        enabled: true,
        module: "org/module/test".to_string(),
        version: None,
        providers: vec![],
        provider_info: HashMap::new(),
        variables: HashMap::new(),
        services: services.iter().map(ToString::to_string).collect(),
        working_dir: None,
        env: HashMap::new(),
        buffer_period: None,
        condition: Condition::Services {
            names: services.iter().map(ToString::to_string).collect(),
            regexp: None,
            datacenter: None,
            namespace: None,
            filter: None,
            cts_user_defined_meta: HashMap::new(),
        },
    }
}

pub fn scheduled_task(name: &str, cron: &str) -> TaskConfig {
    TaskConfig {
        condition: Condition::Schedule {
            cron: cron.to_string(),
        },
        ..dynamic_task(name, &[])
    }
}

/// Poll until `predicate` holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
