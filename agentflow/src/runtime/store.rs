//! In-memory storage for paused runs

use super::run::{RunId, RunRecord, WorkflowRun};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// Paused runs keyed by id
///
/// Each run sits behind a `Mutex` because a run holds a [`crate::StepValue`],
/// which is `Send` but not `Sync`.
#[derive(Clone, Default)]
pub struct RunStore {
    runs: Arc<DashMap<RunId, Mutex<WorkflowRun>>>,
}

impl RunStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a run for later resumption
    pub fn insert(&self, run: WorkflowRun) {
        tracing::debug!("Storing run {} with status {}", run.id, run.status);
        self.runs.insert(run.id, Mutex::new(run));
    }

    /// Remove a run so it can be driven again
    pub fn take(&self, id: &RunId) -> Option<WorkflowRun> {
        self.runs.remove(id).map(|(_, run)| match run.into_inner() {
            Ok(run) => run,
            Err(poisoned) => poisoned.into_inner(),
        })
    }

    /// True when a run is stored
    pub fn contains(&self, id: &RunId) -> bool {
        self.runs.contains_key(id)
    }

    /// Summary of a stored run
    pub fn record(&self, id: &RunId) -> Option<RunRecord> {
        self.runs.get(id).map(|entry| match entry.value().lock() {
            Ok(run) => run.record(),
            Err(poisoned) => poisoned.into_inner().record(),
        })
    }

    /// Ids of every stored run
    pub fn ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Number of stored runs
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
