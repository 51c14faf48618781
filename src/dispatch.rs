//! Run dispatch: one run, one server, one TCP exchange.
//!
//! # Dispatch Flow
//!
//! 1. Take the run's `Ready -> Running` latch and persist `Running`
//! 2. Resolve the area and encode the command
//! 3. Select an online server from the pool
//! 4. Connect, write the whole command, half-close the write side
//! 5. Read until Mantis closes the connection, then decode
//! 6. Persist the terminal state
//!
//! Transient failures (no server, connect/write/read problems, encode
//! rejections, cancellation) hand the run back as `Ready` with the cause in
//! its status message. A response that does not decode, or that overruns
//! `max_response_bytes`, moves the run to `Failed`. Nothing here retries; a later dispatch of the same run behaves
//! like the first one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DispatcherConfig, Server};
use crate::error::{DispatchError, Result};
use crate::pool::ServerPool;
use crate::protocol::ProtocolCodec;
use crate::run::{AreaKindMap, ResultValue, Run, RunEvent, RunStore};

/// What a successful dispatch produced.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub run_id: Uuid,
    pub server: Server,
    pub values: usize,
    pub wells: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
struct ExchangeLimits {
    connect: Duration,
    write: Duration,
    read: Duration,
    max_response_bytes: usize,
}

pub struct RunDispatcher {
    pool: Arc<ServerPool>,
    store: Arc<dyn RunStore>,
    codec: ProtocolCodec,
    area_kinds: AreaKindMap,
    limits: ExchangeLimits,
}

impl RunDispatcher {
    pub fn new(config: &DispatcherConfig, pool: Arc<ServerPool>, store: Arc<dyn RunStore>) -> Self {
        Self {
            pool,
            store,
            codec: ProtocolCodec::new(config.result_order),
            area_kinds: config.area_kinds.clone(),
            limits: ExchangeLimits {
                connect: config.connect_timeout(),
                write: config.write_timeout(),
                read: config.read_timeout(),
                max_response_bytes: config.max_response_bytes,
            },
        }
    }

    /// Wire command for a run, without sending it.
    pub fn command_for(&self, run: &Run) -> Result<Vec<u8>> {
        let area = self.area_kinds.resolve(&run.spec().area);
        Ok(self.codec.encode(run.spec(), area)?)
    }

    pub async fn dispatch(&self, run: &Run) -> Result<DispatchOutcome> {
        self.dispatch_with_cancel(run, &CancellationToken::new())
            .await
    }

    /// Dispatch a `Ready` run. Cancelling the token drops the connection and
    /// rolls the run back to `Ready`.
    pub async fn dispatch_with_cancel(
        &self,
        run: &Run,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome> {
        let run_id = run.id();
        if let Err(state) = run.try_begin() {
            tracing::debug!(run_id = %run_id, state = %state, "Run not ready, dispatch refused");
            return Err(DispatchError::AlreadyDispatched { run_id, state });
        }
        tracing::info!(run_id = %run_id, name = %run.spec().name, "Dispatching run");
        run.set_status_message("Dispatching".to_string()).await;

        if let Err(e) = self.store.persist(&run.snapshot().await).await {
            return Err(self.roll_back(run, e.into()).await);
        }

        let started = Instant::now();
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            attempt = self.attempt(run) => attempt,
        };

        match attempt {
            Ok((server, values)) => Ok(self.complete(run, server, values, started).await),
            Err(err) if err.is_transient() => Err(self.roll_back(run, err).await),
            Err(err) => Err(self.fail(run, err).await),
        }
    }

    async fn attempt(&self, run: &Run) -> Result<(Server, Vec<ResultValue>)> {
        let command = self.command_for(run)?;
        let server = self.pool.select_available()?;
        tracing::debug!(
            run_id = %run.id(),
            server = %server,
            command = %String::from_utf8_lossy(&command).trim_end(),
            "Sending command"
        );

        let response = match self.exchange(&server, &command).await {
            Ok(response) => response,
            Err(e) => {
                if e.implicates_server() {
                    self.pool.mark_offline(&server);
                }
                return Err(e);
            }
        };
        self.pool.mark_online(&server);

        let values = self.codec.decode(&response, run.spec().n_years)?;
        Ok((server, values))
    }

    async fn exchange(&self, server: &Server, command: &[u8]) -> Result<Vec<u8>> {
        let limits = self.limits;

        let mut stream = match timeout(
            limits.connect,
            TcpStream::connect((server.host.as_str(), server.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DispatchError::Connect {
                    server: server.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DispatchError::Connect {
                    server: server.to_string(),
                    reason: format!("timed out after {}ms", limits.connect.as_millis()),
                })
            }
        };

        // write_all keeps going on partial writes; shutdown half-closes so
        // Mantis sees end of input.
        let send = async {
            stream.write_all(command).await?;
            stream.shutdown().await
        };
        match timeout(limits.write, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(DispatchError::Write {
                    server: server.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DispatchError::Write {
                    server: server.to_string(),
                    reason: format!("timed out after {}ms", limits.write.as_millis()),
                })
            }
        }

        // No length field: the response ends when Mantis closes.
        let mut response = Vec::new();
        let mut limited = (&mut stream).take(limits.max_response_bytes as u64 + 1);
        match timeout(limits.read, limited.read_to_end(&mut response)).await {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => {
                return Err(DispatchError::Io {
                    server: server.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(DispatchError::ReadTimeout {
                    server: server.to_string(),
                    timeout_ms: limits.read.as_millis() as u64,
                })
            }
        }
        if response.len() > limits.max_response_bytes {
            return Err(DispatchError::ResponseTooLarge {
                server: server.to_string(),
                limit: limits.max_response_bytes,
            });
        }

        tracing::debug!(server = %server, bytes = response.len(), "Response received");
        Ok(response)
    }

    async fn complete(
        &self,
        run: &Run,
        server: Server,
        values: Vec<ResultValue>,
        started: Instant,
    ) -> DispatchOutcome {
        let count = values.len();
        let wells = count / run.spec().n_years.max(1) as usize;
        let message = format!("Successfully run on {server}: {count} values for {wells} wells");
        self.transition(run, RunEvent::Succeed, message, Some(values))
            .await;

        let outcome = DispatchOutcome {
            run_id: run.id(),
            server,
            values: count,
            wells,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            run_id = %outcome.run_id,
            server = %outcome.server,
            values = outcome.values,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Run complete"
        );
        outcome
    }

    async fn roll_back(&self, run: &Run, err: DispatchError) -> DispatchError {
        tracing::warn!(run_id = %run.id(), error = %err, "Dispatch failed, run returned to ready");
        let message = format!("Dispatch failed: {err}. The run will be retried.");
        self.transition(run, RunEvent::Rollback, message, None).await;
        err
    }

    async fn fail(&self, run: &Run, err: DispatchError) -> DispatchError {
        tracing::error!(run_id = %run.id(), error = %err, "Model run failed");
        let message = format!("Model run failed: {err}");
        self.transition(run, RunEvent::Fail, message, None).await;
        err
    }

    /// Move a running run to its next state and persist it.
    ///
    /// A store failure here is logged, not returned: the durable copy still
    /// says `Running`, which is what reconciliation looks for.
    async fn transition(
        &self,
        run: &Run,
        event: RunEvent,
        message: String,
        result: Option<Vec<ResultValue>>,
    ) {
        let state = match run.finish(event, message, result).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(run_id = %run.id(), error = %e, "Invalid run transition");
                return;
            }
        };
        if let Err(e) = self.store.persist(&run.snapshot().await).await {
            tracing::error!(run_id = %run.id(), state = %state, error = %e, "Failed to persist run");
        }
    }
}
