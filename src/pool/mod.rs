//! Mantis server pool.
//!
//! Membership is fixed at construction. Each server carries a small health
//! state machine (`Unknown -> Online | Offline`) in an atomic, so probes and
//! dispatch outcomes can update one server without touching the others.
//! Health is advisory: a server that looked online can still refuse the
//! job connection, and the dispatcher deals with that.

pub mod monitor;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::{DispatcherConfig, ProbeConfig, Server};
use crate::error::{DispatchError, Result};

pub use monitor::HealthMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ServerHealth {
    Unknown = 0,
    Online = 1,
    Offline = 2,
}

impl ServerHealth {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerHealth::Online,
            2 => ServerHealth::Offline,
            _ => ServerHealth::Unknown,
        }
    }
}

impl std::fmt::Display for ServerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerHealth::Unknown => write!(f, "unknown"),
            ServerHealth::Online => write!(f, "online"),
            ServerHealth::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug)]
struct ServerSlot {
    server: Server,
    health: AtomicU8,
    /// Ticket of the last selection, 0 if never selected
    last_selected: AtomicU64,
}

/// Point-in-time view of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub server: Server,
    pub health: ServerHealth,
}

#[derive(Debug)]
pub struct ServerPool {
    slots: Vec<ServerSlot>,
    probe: ProbeConfig,
    tickets: AtomicU64,
}

impl ServerPool {
    pub fn new(servers: Vec<Server>, probe: ProbeConfig) -> Self {
        let mut slots: Vec<ServerSlot> = Vec::with_capacity(servers.len());
        for server in servers {
            if slots.iter().any(|s| s.server == server) {
                tracing::warn!(server = %server, "Duplicate server ignored");
                continue;
            }
            slots.push(ServerSlot {
                server,
                health: AtomicU8::new(ServerHealth::Unknown as u8),
                last_selected: AtomicU64::new(0),
            });
        }
        Self {
            slots,
            probe,
            tickets: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(config.servers.clone(), config.probe.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn health(&self, server: &Server) -> Option<ServerHealth> {
        self.slot(server)
            .map(|s| ServerHealth::from_u8(s.health.load(Ordering::Acquire)))
    }

    pub fn snapshot(&self) -> Vec<ServerStatus> {
        self.slots
            .iter()
            .map(|s| ServerStatus {
                server: s.server.clone(),
                health: ServerHealth::from_u8(s.health.load(Ordering::Acquire)),
            })
            .collect()
    }

    pub fn mark_online(&self, server: &Server) {
        self.set_health(server, ServerHealth::Online);
    }

    /// Pessimistic update after a failed job connection.
    pub fn mark_offline(&self, server: &Server) {
        self.set_health(server, ServerHealth::Offline);
    }

    fn set_health(&self, server: &Server, health: ServerHealth) {
        let Some(slot) = self.slot(server) else {
            tracing::warn!(server = %server, "Health update for unknown server");
            return;
        };
        let previous = ServerHealth::from_u8(slot.health.swap(health as u8, Ordering::AcqRel));
        if previous != health {
            tracing::info!(server = %server, from = %previous, to = %health, "Server health changed");
        }
    }

    /// Pick an online server, least recently selected first.
    ///
    /// Never waits for a server to come up. The spread is best-effort: two
    /// concurrent callers can read the same tickets and pick the same server.
    pub fn select_available(&self) -> Result<Server> {
        let slot = self
            .slots
            .iter()
            .filter(|s| s.health.load(Ordering::Acquire) == ServerHealth::Online as u8)
            .min_by_key(|s| s.last_selected.load(Ordering::Acquire))
            .ok_or(DispatchError::NoServerAvailable)?;

        let ticket = self.tickets.fetch_add(1, Ordering::AcqRel) + 1;
        slot.last_selected.store(ticket, Ordering::Release);
        tracing::debug!(server = %slot.server, ticket, "Server selected");
        Ok(slot.server.clone())
    }

    /// Ask one server for its status and cache the answer.
    ///
    /// Connection errors, timeouts and any reply other than the exact
    /// expected payload all count as offline. The reply is only complete
    /// once the server closes, so a server that sends the right payload but
    /// holds the socket open past the timeout is offline too.
    pub async fn probe(&self, server: &Server) -> bool {
        let online = match timeout(self.probe.timeout(), self.status_exchange(server)).await {
            Ok(Ok(reply)) => {
                let matched = reply == self.probe.expected_response;
                if !matched {
                    tracing::debug!(
                        server = %server,
                        reply = %String::from_utf8_lossy(&reply),
                        "Unexpected status reply"
                    );
                }
                matched
            }
            Ok(Err(e)) => {
                tracing::debug!(server = %server, error = %e, "Status probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(server = %server, timeout_ms = self.probe.timeout_ms, "Status probe timed out");
                false
            }
        };

        self.set_health(
            server,
            if online {
                ServerHealth::Online
            } else {
                ServerHealth::Offline
            },
        );
        online
    }

    async fn status_exchange(&self, server: &Server) -> std::io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect((server.host.as_str(), server.port)).await?;
        stream.write_all(&self.probe.request).await?;
        stream.shutdown().await?;

        // One byte past the expected length is enough to tell a mismatch.
        let limit = self.probe.expected_response.len() as u64 + 1;
        let mut reply = Vec::new();
        (&mut stream).take(limit).read_to_end(&mut reply).await?;
        Ok(reply)
    }

    /// Probe every server concurrently. Each probe has its own timeout, so
    /// one unreachable host cannot hold up the rest.
    pub async fn probe_all(self: &Arc<Self>) -> Vec<(Server, bool)> {
        let mut probes = JoinSet::new();
        for slot in &self.slots {
            let pool = Arc::clone(self);
            let server = slot.server.clone();
            probes.spawn(async move {
                let online = pool.probe(&server).await;
                (server, online)
            });
        }

        let mut report = Vec::with_capacity(self.slots.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(entry) => report.push(entry),
                Err(e) => tracing::error!(error = %e, "Probe task panicked"),
            }
        }

        let online = report.iter().filter(|(_, up)| *up).count();
        tracing::info!(online, total = report.len(), "Server pool probed");
        report
    }

    fn slot(&self, server: &Server) -> Option<&ServerSlot> {
        self.slots.iter().find(|s| s.server == *server)
    }
}
