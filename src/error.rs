use thiserror::Error;
use uuid::Uuid;

use crate::run::RunState;

/// Rejections raised while building a job command line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Invalid modification for crop {crop}: {reason}")]
    InvalidModification { crop: u16, reason: String },

    #[error("Invalid scenario name {0:?}: must be non-empty ASCII with no whitespace")]
    InvalidScenario(String),
}

/// Failures turning a server response into result values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty response from server")]
    Empty,

    #[error("Malformed response: token {position} ({token:?}) is not a number")]
    Malformed { position: usize, token: String },

    #[error("Malformed response: {values} values cannot be split into {years} years")]
    Misaligned { values: usize, years: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    Invalid { name: String, reason: String },
}

impl ConfigError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reading a run definition file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid run definition in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Run store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("Run has no stored results")]
    NotComplete,

    #[error("Percentile {0} is outside 0..=100")]
    InvalidPercentile(f64),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Run {run_id} cannot be dispatched from state {state}")]
    AlreadyDispatched { run_id: Uuid, state: RunState },

    #[error("No Mantis server available")]
    NoServerAvailable,

    #[error("Failed to connect to {server}: {reason}")]
    Connect { server: String, reason: String },

    #[error("Failed to send command to {server}: {reason}")]
    Write { server: String, reason: String },

    #[error("Timed out after {timeout_ms}ms waiting for {server} to finish")]
    ReadTimeout { server: String, timeout_ms: u64 },

    #[error("Response from {server} exceeded {limit} bytes")]
    ResponseTooLarge { server: String, limit: usize },

    #[error("I/O error talking to {server}: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dispatch cancelled")]
    Cancelled,

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Whether the run was rolled back to `Ready` and may be dispatched again.
    ///
    /// An oversized response is as final as an undecodable one: running the
    /// same job again produces the same output.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            DispatchError::Decode(_)
                | DispatchError::ResponseTooLarge { .. }
                | DispatchError::AlreadyDispatched { .. }
        )
    }

    /// Errors that say something about the server rather than the run.
    pub fn implicates_server(&self) -> bool {
        matches!(
            self,
            DispatchError::Connect { .. }
                | DispatchError::Write { .. }
                | DispatchError::ReadTimeout { .. }
                | DispatchError::Io { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
