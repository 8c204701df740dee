//! Driver registry.
//!
//! Thread-safe map from task name to its driver, carrying the two lifecycle
//! flags the engine coordinates on: `active` (a run is in flight) and
//! `marked_for_deletion` (the task is to be removed once quiescent).
//!
//! Invariants:
//! - at most one entry per task name;
//! - while `active` is set, no second run of the same task may begin;
//! - `marked_for_deletion` is monotonic: only `delete` clears it, by removing
//!   the entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::Driver;

struct RegistryEntry {
    driver: Arc<dyn Driver>,
    active: bool,
    marked_for_deletion: bool,
}

/// Task name → driver map with active/deletion flags.
///
/// All methods are synchronous and never await while holding the lock;
/// readers take a shared lease, flag transitions take the exclusive one.
#[derive(Default)]
pub struct DriverRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under a task name.
    pub fn add(&self, name: &str, driver: Arc<dyn Driver>) -> DomainResult<()> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(name) {
            return Err(DomainError::AlreadyExists(name.to_string()));
        }
        entries.insert(
            name.to_string(),
            RegistryEntry {
                driver,
                active: false,
                marked_for_deletion: false,
            },
        );
        Ok(())
    }

    /// Look up a task's driver.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(name).map(|e| Arc::clone(&e.driver))
    }

    /// Find the task depending on a template.
    pub fn get_by_template(&self, template_id: &str) -> Option<(String, Arc<dyn Driver>)> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.iter().find_map(|(name, entry)| {
            entry
                .driver
                .template_ids()
                .iter()
                .any(|id| id == template_id)
                .then(|| (name.clone(), Arc::clone(&entry.driver)))
        })
    }

    /// Remove a task's entry.
    ///
    /// Fails with `Conflict` while a run is in flight; callers await
    /// quiescence first.
    pub fn delete(&self, name: &str) -> DomainResult<()> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if let Some(entry) = entries.get(name) {
            if entry.active {
                return Err(DomainError::conflict(name, "is still running"));
            }
            entries.remove(name);
        }
        Ok(())
    }

    pub fn is_active(&self, name: &str) -> bool {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(name).is_some_and(|e| e.active)
    }

    /// Claim the active flag. Returns true only when this call transitioned
    /// the flag from inactive to active, so concurrent claimants cannot both
    /// win.
    pub fn set_active(&self, name: &str) -> bool {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        match entries.get_mut(name) {
            Some(entry) if !entry.active => {
                entry.active = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_inactive(&self, name: &str) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if let Some(entry) = entries.get_mut(name) {
            entry.active = false;
        }
    }

    pub fn is_marked_for_deletion(&self, name: &str) -> bool {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(name).is_some_and(|e| e.marked_for_deletion)
    }

    /// Mark a task for removal. Returns false when the task is unknown.
    pub fn mark_for_deletion(&self, name: &str) -> bool {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        match entries.get_mut(name) {
            Some(entry) => {
                entry.marked_for_deletion = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .is_empty()
    }

    /// Snapshot of all drivers keyed by task name.
    pub fn map(&self) -> HashMap<String, Arc<dyn Driver>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.driver)))
            .collect()
    }

    /// Forward buffer periods to the watcher for every dynamic task.
    ///
    /// Scheduled tasks are skipped: buffering debounces watcher
    /// notifications, which they do not consume.
    pub fn set_buffer_periods(&self) {
        for (_, driver) in self.map() {
            if !driver.task().is_scheduled() {
                driver.set_buffer_period();
            }
        }
    }
}
