//! Persistence boundary for run state.
//!
//! Durable storage belongs to the web layer; the dispatcher only promises to
//! hand over every transition, and to hand over `Running` before it touches
//! the network so that a crash mid-dispatch shows up as a stuck run.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::run::{RunRecord, RunState};

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Durably record the current state of a run.
    async fn persist(&self, record: &RunRecord) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct StoredRun {
    latest: RunRecord,
    history: Vec<RunState>,
}

/// Keeps the latest record and every persisted state per run.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<Uuid, StoredRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self, id: &Uuid) -> Option<RunRecord> {
        self.runs.read().await.get(id).map(|s| s.latest.clone())
    }

    /// States in the order they were persisted.
    pub async fn history(&self, id: &Uuid) -> Vec<RunState> {
        self.runs
            .read()
            .await
            .get(id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn persist(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&record.id) {
            Some(stored) => {
                stored.history.push(record.state);
                stored.latest = record.clone();
            }
            None => {
                runs.insert(
                    record.id,
                    StoredRun {
                        latest: record.clone(),
                        history: vec![record.state],
                    },
                );
            }
        }
        tracing::debug!(run_id = %record.id, state = %record.state, "Run persisted");
        Ok(())
    }
}
