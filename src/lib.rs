pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod results;
pub mod run;
pub mod service;
pub mod shutdown;

pub use config::{DispatcherConfig, ResultOrder, Server};
pub use dispatch::{DispatchOutcome, RunDispatcher};
pub use error::{DispatchError, Result};
pub use pool::ServerPool;
pub use protocol::ProtocolCodec;
pub use results::ResultAggregator;
pub use run::{Run, RunRecord, RunSpec, RunState};
pub use service::DispatchService;
