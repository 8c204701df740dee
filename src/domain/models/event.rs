//! Run event model.
//!
//! One event records one reconciliation run (or scheduled no-op tick) of a
//! task. Events are appended to the per-task history in the state store so
//! users can observe run outcomes through the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::task::Task;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single run of a task, from trigger to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub task_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
    /// Provider IDs of the task, in configured order.
    pub providers: Vec<String>,
    pub services: Vec<String>,
    /// The module the run applied.
    pub source: String,
}

impl Event {
    /// Begin an event for a run starting now.
    pub fn begin(task_name: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            task_name: task_name.into(),
            start_time: Utc::now(),
            end_time: None,
            success: false,
            error: None,
            providers: Vec::new(),
            services: Vec::new(),
            source: String::new(),
        }
    }

    /// Attach task metadata to the event.
    pub fn with_task(mut self, task: &Task) -> Self {
        self.providers = task.provider_names();
        self.services = task.services.clone();
        self.source = task.module.clone();
        self
    }

    /// Close the event with the run outcome.
    pub fn end(&mut self, result: Result<(), &DomainError>) {
        self.end_time = Some(Utc::now());
        match result {
            Ok(()) => {
                self.success = true;
                self.error = None;
            }
            Err(err) => {
                self.success = false;
                self.error = Some(err.to_string());
            }
        }
    }
}
