//! Ports: async trait seams for external collaborators.

pub mod driver;
pub mod resolver;
pub mod state_store;
pub mod watcher;

pub use driver::{Driver, InspectPlan, RunOption, TaskPatch};
pub use resolver::ProviderResolver;
pub use state_store::StateStore;
pub use watcher::Watcher;
