//! Model runs and their lifecycle.
//!
//! A [`Run`] is the shared handle the web layer hands over and the
//! dispatcher mutates. Its state lives in an atomic so that the
//! `Ready -> Running` latch is a single compare-and-set; everything else
//! that changes (status message, results, completion time) sits behind a
//! lock that is only written by whoever holds the latch.
//!
//! - [`RunSpec`]: the immutable definition (parameters, area, modifications)
//! - [`RunState`]: lifecycle enum with a pure transition function
//! - [`RunRecord`]: owned snapshot used for persistence and aggregation
//! - [`RunQueue`]: live runs known to this process
//! - [`RunStore`]: persistence boundary

pub mod queue;
pub mod spec;
pub mod state;
pub mod store;

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

pub use queue::RunQueue;
pub use spec::{
    Area, AreaKind, AreaKindMap, AreaSelector, Decimal4, InvalidDecimal, Modification,
    ResultValue, RunSpec, WireArea,
};
pub use state::{InvalidTransition, RunEvent, RunState};
pub use store::{MemoryRunStore, RunStore};

#[derive(Debug, Default)]
struct RunOutcome {
    status_message: String,
    result: Option<Vec<ResultValue>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Run {
    id: Uuid,
    spec: RunSpec,
    submitted_at: DateTime<Utc>,
    state: AtomicU8,
    outcome: RwLock<RunOutcome>,
}

impl Run {
    pub fn new(spec: RunSpec) -> Self {
        Self::with_id(Uuid::new_v4(), spec, Utc::now())
    }

    pub fn with_id(id: Uuid, spec: RunSpec, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            spec,
            submitted_at,
            state: AtomicU8::new(RunState::Pending.as_u8()),
            outcome: RwLock::new(RunOutcome::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> &RunSpec {
        &self.spec
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Signal that the run is fully defined and may be dispatched.
    pub fn mark_ready(&self) -> Result<(), InvalidTransition> {
        self.compare_and_apply(RunEvent::MarkReady).map(|_| ())
    }

    /// Take the single-run latch: `Ready -> Running` as one atomic step.
    ///
    /// Returns the observed state when the run was not `Ready`.
    pub(crate) fn try_begin(&self) -> Result<(), RunState> {
        self.compare_and_apply(RunEvent::Start)
            .map(|_| ())
            .map_err(|e| e.from)
    }

    fn compare_and_apply(&self, event: RunEvent) -> Result<RunState, InvalidTransition> {
        let mut current = self.state();
        loop {
            let next = current.apply(event)?;
            match self.state.compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(observed) => current = RunState::from_u8(observed),
            }
        }
    }

    /// Leave `Running` and record what happened.
    ///
    /// Only the holder of the latch calls this, so the outcome and state
    /// are written together under the outcome lock.
    pub(crate) async fn finish(
        &self,
        event: RunEvent,
        status_message: String,
        result: Option<Vec<ResultValue>>,
    ) -> Result<RunState, InvalidTransition> {
        let mut outcome = self.outcome.write().await;
        let next = self.state().apply(event)?;
        outcome.status_message = status_message;
        if next == RunState::Complete {
            outcome.result = result;
            outcome.completed_at = Some(Utc::now());
        }
        self.state.store(next.as_u8(), Ordering::Release);
        Ok(next)
    }

    /// Replace the status message without changing state.
    pub(crate) async fn set_status_message(&self, status_message: String) {
        self.outcome.write().await.status_message = status_message;
    }

    pub async fn status_message(&self) -> String {
        self.outcome.read().await.status_message.clone()
    }

    pub async fn snapshot(&self) -> RunRecord {
        let outcome = self.outcome.read().await;
        RunRecord {
            id: self.id,
            state: self.state(),
            status_message: outcome.status_message.clone(),
            spec: self.spec.clone(),
            result: outcome.result.clone(),
            submitted_at: self.submitted_at,
            completed_at: outcome.completed_at,
        }
    }
}

/// Owned point-in-time copy of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub state: RunState,
    pub status_message: String,
    #[serde(flatten)]
    pub spec: RunSpec,
    pub result: Option<Vec<ResultValue>>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Number of distinct wells in the stored result.
    pub fn n_wells(&self) -> usize {
        self.result
            .as_ref()
            .and_then(|values| values.iter().map(|v| v.well).max())
            .map_or(0, |max| max as usize + 1)
    }
}
