//! Engine services: the registry, factory, stores, and the two long-lived
//! coordinators (tasks manager, condition monitor).

pub mod condition_monitor;
pub mod driver_factory;
pub mod driver_registry;
pub mod event_store;
pub mod retry;
pub mod tasks_manager;

pub use condition_monitor::{ConditionMonitor, DEP_SIZE_WARNING};
pub use driver_factory::{DriverBuilder, DriverFactory, PROVIDER_BLOCK_TIMEOUT};
pub use driver_registry::DriverRegistry;
pub use event_store::{EventStore, DEFAULT_EVENT_COUNT_LIMIT};
pub use retry::{RetryPolicy, DEFAULT_APPLY_RETRIES, MAX_RETRIES};
pub use tasks_manager::{TasksManager, TasksManagerConfig};
