//! Infrasync - catalog-driven infrastructure reconciliation engine
//!
//! Translates changes observed in a service catalog into reconciliation runs
//! of a declarative infrastructure driver, on behalf of user-defined tasks:
//!
//! - Task lifecycle: create, inspect, update, delete, run-now, with at most
//!   one run in flight per task
//! - Condition monitoring: dependency-change notifications and cron ticks
//!   turned into ordered task runs
//! - Bounded in-memory run-event history per task
//! - Exponential-backoff retry of transient apply failures
//!
//! Infrastructure drivers, the dependency watcher, and provider resolvers
//! are ports (`domain::ports`); the embedding application supplies concrete
//! implementations and wires them through `services::TasksManager` and
//! `services::ConditionMonitor`.

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Condition, Config, Event, Task, TaskConfig};
pub use domain::ports::{Driver, InspectPlan, ProviderResolver, RunOption, StateStore, TaskPatch, Watcher};
pub use infrastructure::InMemoryStateStore;
pub use services::{ConditionMonitor, DriverFactory, DriverRegistry, RetryPolicy, TasksManager, TasksManagerConfig};
