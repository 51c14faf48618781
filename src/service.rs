use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dispatch::RunDispatcher;
use crate::error::DispatchError;
use crate::pool::{HealthMonitor, ServerPool};
use crate::run::{Run, RunQueue, RunStore};

/// Long-running host for the dispatcher.
///
/// Stands in for the external scheduler: it keeps the pool's health fresh
/// and periodically dispatches every `Ready` run it knows about. Failed
/// attempts leave runs `Ready`, so the next sweep picks them up again.
pub struct DispatchService {
    pub config: DispatcherConfig,
    pub pool: Arc<ServerPool>,
    pub queue: Arc<RwLock<RunQueue>>,
    pub dispatcher: Arc<RunDispatcher>,
    permits: Arc<Semaphore>,
}

impl DispatchService {
    pub fn new(config: DispatcherConfig, store: Arc<dyn RunStore>) -> Self {
        let pool = Arc::new(ServerPool::from_config(&config));
        let dispatcher = Arc::new(RunDispatcher::new(&config, pool.clone(), store));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatches.max(1)));

        Self {
            config,
            pool,
            queue: Arc::new(RwLock::new(RunQueue::new())),
            dispatcher,
            permits,
        }
    }

    /// Hand a run over. Returns false if the queue refused it.
    pub async fn submit(&self, run: Arc<Run>) -> bool {
        let run_id = run.id();
        let accepted = self.queue.write().await.add_run(run);
        if accepted {
            tracing::info!(run_id = %run_id, "Run queued");
        } else {
            tracing::warn!(run_id = %run_id, "Run queue full or duplicate id, run dropped");
        }
        accepted
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Complete and failed runs are dropped from the queue after each sweep;
    /// their durable copy is in the run store.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.run_loop(shutdown, false).await;
    }

    /// Run until every queued run is terminal, or until `shutdown`.
    pub async fn run_until_settled(&self, shutdown: CancellationToken) {
        self.run_loop(shutdown, true).await;
    }

    /// 1. Spawns the health monitor (probes immediately, then on interval)
    /// 2. Sweeps `Ready` runs on `sweep_interval_ms`, one task per run,
    ///    bounded by `max_concurrent_dispatches`
    /// 3. Outside `until_settled`, drops terminal runs so the queue does
    ///    not fill up
    /// 4. On shutdown, cancels in-flight dispatches (they roll back to
    ///    `Ready`) and waits for them to finish
    async fn run_loop(&self, shutdown: CancellationToken, until_settled: bool) {
        let monitor_token = shutdown.child_token();
        let monitor = HealthMonitor::new(self.config.probe.interval());
        let monitor_pool = self.pool.clone();
        let monitor_handle = {
            let token = monitor_token.clone();
            tokio::spawn(async move { monitor.run(monitor_pool, token).await })
        };

        // Let the first probe round land before the first sweep.
        self.pool.probe_all().await;

        let mut in_flight = JoinSet::new();
        let mut sweep_interval = tokio::time::interval(self.config.sweep_interval());
        sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(in_flight = in_flight.len(), "Dispatch service shutting down");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Dispatch task panicked");
                    }
                }
                _ = sweep_interval.tick() => {
                    if until_settled && in_flight.is_empty() && self.queue.read().await.is_settled() {
                        tracing::info!("All runs settled");
                        break;
                    }
                    self.sweep(&mut in_flight, &shutdown).await;
                    if !until_settled {
                        let removed = self.queue.write().await.cleanup_finished_runs();
                        if removed > 0 {
                            tracing::debug!(removed, "Finished runs dropped from queue");
                        }
                    }
                }
            }
        }

        monitor_token.cancel();
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Dispatch task panicked");
            }
        }
        if let Err(e) = monitor_handle.await {
            tracing::error!(error = %e, "Health monitor panicked");
        }
    }

    /// Start a dispatch for each `Ready` run while permits last. Runs that
    /// do not get a permit wait for the next sweep.
    async fn sweep(&self, in_flight: &mut JoinSet<()>, shutdown: &CancellationToken) {
        let ready = self.queue.read().await.ready_runs();
        if ready.is_empty() {
            return;
        }
        tracing::debug!(ready = ready.len(), "Sweeping ready runs");

        for run in ready {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                tracing::debug!("Dispatch capacity reached, deferring remaining runs");
                break;
            };
            let dispatcher = self.dispatcher.clone();
            let token = shutdown.child_token();
            in_flight.spawn(async move {
                let _permit = permit;
                match dispatcher.dispatch_with_cancel(&run, &token).await {
                    Ok(_) => {}
                    Err(DispatchError::AlreadyDispatched { .. }) => {}
                    Err(e) => {
                        tracing::debug!(run_id = %run.id(), error = %e, "Sweep dispatch did not complete");
                    }
                }
            });
        }
    }
}
