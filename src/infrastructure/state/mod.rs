//! In-memory state store.
//!
//! The bundled `StateStore` implementation: task configs in a locked map,
//! run events in the bounded event store. All reads return owned snapshots.
//! Durability across restarts is explicitly out of scope.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::event::Event;
use crate::domain::models::task::TaskConfig;
use crate::domain::ports::StateStore;
use crate::services::event_store::EventStore;

/// Task configs and event history held in process memory.
pub struct InMemoryStateStore {
    tasks: RwLock<HashMap<String, TaskConfig>>,
    events: EventStore,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            events: EventStore::new(),
        }
    }

    /// Override the per-task event history bound.
    pub fn with_event_limit(limit: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            events: EventStore::with_limit(limit),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_task(&self, name: &str) -> DomainResult<Option<TaskConfig>> {
        let tasks = self.tasks.read().expect("state lock poisoned");
        Ok(tasks.get(name).cloned())
    }

    async fn set_task(&self, config: TaskConfig) -> DomainResult<()> {
        let mut tasks = self.tasks.write().expect("state lock poisoned");
        tasks.insert(config.name.clone(), config);
        Ok(())
    }

    async fn delete_task(&self, name: &str) -> DomainResult<()> {
        let mut tasks = self.tasks.write().expect("state lock poisoned");
        tasks.remove(name);
        Ok(())
    }

    async fn get_all_tasks(&self) -> DomainResult<Vec<TaskConfig>> {
        let tasks = self.tasks.read().expect("state lock poisoned");
        let mut all: Vec<TaskConfig> = tasks.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn add_task_event(&self, event: Event) -> DomainResult<()> {
        self.events.add(event);
        Ok(())
    }

    async fn get_task_events(&self, task_name: &str) -> DomainResult<Vec<Event>> {
        Ok(self.events.events(task_name))
    }

    async fn delete_task_events(&self, task_name: &str) -> DomainResult<()> {
        self.events.delete(task_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::Condition;

    fn config(name: &str) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            description: None,
            enabled: true,
            module: "m".to_string(),
            version: None,
            providers: vec![],
            provider_info: HashMap::new(),
            variables: HashMap::new(),
            services: vec![],
            working_dir: None,
            env: HashMap::new(),
            buffer_period: None,
            condition: Condition::Catalog {
                regexp: None,
                datacenter: None,
                namespace: None,
                node_meta: HashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_set_get_delete_task() {
        let store = InMemoryStateStore::new();
        store.set_task(config("t1")).await.unwrap();

        assert!(store.get_task("t1").await.unwrap().is_some());
        assert!(store.get_task("t2").await.unwrap().is_none());

        store.delete_task("t1").await.unwrap();
        assert!(store.get_task("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_tasks_sorted_snapshot() {
        let store = InMemoryStateStore::new();
        store.set_task(config("b")).await.unwrap();
        store.set_task(config("a")).await.unwrap();

        let all = store.get_all_tasks().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "a");
        assert_eq!(all[1].name, "b");
    }

    #[tokio::test]
    async fn test_events_follow_task_lifecycle() {
        let store = InMemoryStateStore::new();
        store.add_task_event(Event::begin("t1")).await.unwrap();
        assert_eq!(store.get_task_events("t1").await.unwrap().len(), 1);

        store.delete_task_events("t1").await.unwrap();
        assert!(store.get_task_events("t1").await.unwrap().is_empty());
    }
}
