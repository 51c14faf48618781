use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::pool::ServerPool;

/// Periodically refreshes the health of every server in a pool.
pub struct HealthMonitor {
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Probe the pool every interval until cancelled. The first probe is one
    /// interval out; callers that need health right away probe once first.
    pub async fn run(&self, pool: Arc<ServerPool>, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Health monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    pool.probe_all().await;
                }
            }
        }
    }
}
