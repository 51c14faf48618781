use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a model run.
///
/// `Pending -> Ready -> Running -> {Complete | Failed}`, with
/// `Running -> Ready` as the rollback edge for transient dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RunState {
    Pending = 0,
    Ready = 1,
    Running = 2,
    Complete = 3,
    Failed = 4,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Ready => write!(f, "ready"),
            RunState::Running => write!(f, "running"),
            RunState::Complete => write!(f, "complete"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Things that happen to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// All modifications are attached; the run may be picked up.
    MarkReady,
    /// A dispatcher took the run.
    Start,
    /// Results were received and decoded.
    Succeed,
    /// The exchange produced something that will not improve on retry.
    Fail,
    /// The attempt failed for a transient reason; hand the run back.
    Rollback,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot apply {event:?} to a {from} run")]
pub struct InvalidTransition {
    pub from: RunState,
    pub event: RunEvent,
}

impl RunState {
    /// Pure transition function.
    pub fn apply(self, event: RunEvent) -> Result<RunState, InvalidTransition> {
        use RunEvent::*;
        use RunState::*;

        match (self, event) {
            (Pending, MarkReady) => Ok(Ready),
            (Ready, Start) => Ok(Running),
            (Running, Succeed) => Ok(Complete),
            (Running, Fail) => Ok(Failed),
            (Running, Rollback) => Ok(Ready),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> RunState {
        match value {
            0 => RunState::Pending,
            1 => RunState::Ready,
            2 => RunState::Running,
            3 => RunState::Complete,
            _ => RunState::Failed,
        }
    }
}
