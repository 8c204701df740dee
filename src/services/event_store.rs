//! In-memory run-event history.
//!
//! Keeps a bounded, newest-first history of run events per task. The bound
//! keeps long-lived daemons from accumulating unbounded state; old entries
//! fall off the tail.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::domain::models::event::Event;

/// Default number of events retained per task.
pub const DEFAULT_EVENT_COUNT_LIMIT: usize = 5;

/// Bounded per-task event history.
pub struct EventStore {
    limit: usize,
    events: RwLock<HashMap<String, VecDeque<Event>>>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_EVENT_COUNT_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Append an event to its task's history, evicting the oldest entry when
    /// the history is full.
    pub fn add(&self, event: Event) {
        let mut events = self.events.write().expect("event store lock poisoned");
        let history = events.entry(event.task_name.clone()).or_default();
        if history.len() == self.limit {
            history.pop_back();
        }
        history.push_front(event);
    }

    /// Events for one task, newest first.
    pub fn events(&self, task_name: &str) -> Vec<Event> {
        let events = self.events.read().expect("event store lock poisoned");
        events
            .get(task_name)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every task's history, newest first.
    pub fn all(&self) -> HashMap<String, Vec<Event>> {
        let events = self.events.read().expect("event store lock poisoned");
        events
            .iter()
            .map(|(name, history)| (name.clone(), history.iter().cloned().collect()))
            .collect()
    }

    /// Purge a task's history.
    pub fn delete(&self, task_name: &str) {
        let mut events = self.events.write().expect("event store lock poisoned");
        events.remove(task_name);
    }
}
