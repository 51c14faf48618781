use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::run::{Run, RunState};

const DEFAULT_MAX_RUNS: usize = 10_000;

/// Live run handles known to this process.
#[derive(Debug)]
pub struct RunQueue {
    runs: HashMap<Uuid, Arc<Run>>,
    max_runs: usize,
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RUNS)
    }

    pub fn with_capacity(max_runs: usize) -> Self {
        Self {
            runs: HashMap::new(),
            max_runs,
        }
    }

    /// Add a run. Returns false if the queue is at capacity or the id is taken.
    pub fn add_run(&mut self, run: Arc<Run>) -> bool {
        if self.runs.len() >= self.max_runs || self.runs.contains_key(&run.id()) {
            return false;
        }
        self.runs.insert(run.id(), run);
        true
    }

    pub fn get_run(&self, id: &Uuid) -> Option<Arc<Run>> {
        self.runs.get(id).cloned()
    }

    /// Runs eligible for dispatch, oldest submission first.
    pub fn ready_runs(&self) -> Vec<Arc<Run>> {
        self.runs_in(|state| state == RunState::Ready)
    }

    /// All runs sorted chronologically by submission time.
    pub fn all_runs(&self) -> Vec<Arc<Run>> {
        self.runs_in(|_| true)
    }

    pub fn count_in(&self, state: RunState) -> usize {
        self.runs.values().filter(|r| r.state() == state).count()
    }

    /// True once no run is waiting on or holding a dispatch.
    pub fn is_settled(&self) -> bool {
        self.runs
            .values()
            .all(|r| !matches!(r.state(), RunState::Ready | RunState::Running))
    }

    /// Drop complete and failed runs. Returns the number removed.
    pub fn cleanup_finished_runs(&mut self) -> usize {
        let before = self.runs.len();
        self.runs.retain(|_, run| !run.state().is_terminal());
        before - self.runs.len()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.runs.len() >= self.max_runs
    }

    fn runs_in(&self, keep: impl Fn(RunState) -> bool) -> Vec<Arc<Run>> {
        let mut runs: Vec<Arc<Run>> = self
            .runs
            .values()
            .filter(|r| keep(r.state()))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.submitted_at());
        runs
    }
}
