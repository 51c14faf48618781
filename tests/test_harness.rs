//! Test harness for dispatcher integration tests.
//!
//! Provides fake Mantis servers on loopback ports and helpers for building
//! runs, pools and dispatchers with short timeouts.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mantis_dispatch::config::{DispatcherConfig, ProbeConfig, Server};
use mantis_dispatch::pool::ServerPool;
use mantis_dispatch::protocol::{DEFAULT_STATUS_REQUEST, DEFAULT_STATUS_RESPONSE};
use mantis_dispatch::run::{Decimal4, MemoryRunStore, Modification, Run, RunSpec};
use mantis_dispatch::RunDispatcher;

/// How a fake server answers one connection.
pub enum Reply {
    /// Write these bytes, then close
    Send(Vec<u8>),
    /// Wait, then write and close
    Delayed(Duration, Vec<u8>),
    /// Write these bytes but keep the connection open
    Hold(Vec<u8>),
    /// Keep the connection open and never answer
    Hang,
}

pub type Handler = Arc<dyn Fn(&[u8]) -> Reply + Send + Sync>;

/// A loopback TCP server that records every request it reads.
pub struct FakeMantis {
    pub server: Server,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeMantis {
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let handle = {
            let requests = requests.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let handler = handler.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        // Mantis reads until the client half-closes.
                        let mut request = Vec::new();
                        if stream.read_to_end(&mut request).await.is_err() {
                            return;
                        }
                        let reply = handler(&request);
                        requests.lock().unwrap().push(request);
                        match reply {
                            Reply::Send(bytes) => {
                                let _ = stream.write_all(&bytes).await;
                                let _ = stream.shutdown().await;
                            }
                            Reply::Delayed(delay, bytes) => {
                                tokio::time::sleep(delay).await;
                                let _ = stream.write_all(&bytes).await;
                                let _ = stream.shutdown().await;
                            }
                            Reply::Hold(bytes) => {
                                let _ = stream.write_all(&bytes).await;
                                tokio::time::sleep(Duration::from_secs(3600)).await;
                            }
                            Reply::Hang => {
                                tokio::time::sleep(Duration::from_secs(3600)).await;
                            }
                        }
                    });
                }
            })
        };

        Self {
            server: Server::new("127.0.0.1", port),
            requests,
            connections,
            handle,
        }
    }

    /// Answers status probes correctly and jobs with `n_years * wells`
    /// values, well-major, where value = well * 1000 + year.
    pub async fn mantis(wells: u32) -> Self {
        Self::start(mantis_handler(wells, None)).await
    }

    /// Like [`mantis`](Self::mantis) but holds every job reply for `delay`.
    pub async fn slow(wells: u32, delay: Duration) -> Self {
        Self::start(mantis_handler(wells, Some(delay))).await
    }

    /// Replies to every connection with the same bytes.
    pub async fn replying(bytes: &[u8]) -> Self {
        let bytes = bytes.to_vec();
        Self::start(Arc::new(move |_: &[u8]| Reply::Send(bytes.clone()))).await
    }

    /// Reads requests and never answers or closes.
    pub async fn silent() -> Self {
        Self::start(Arc::new(|_: &[u8]| Reply::Hang)).await
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Job commands received, excluding status probes.
    pub fn job_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_slice() != DEFAULT_STATUS_REQUEST)
            .map(|r| String::from_utf8_lossy(r).to_string())
            .collect()
    }
}

impl Drop for FakeMantis {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn mantis_handler(wells: u32, delay: Option<Duration>) -> Handler {
    Arc::new(move |request: &[u8]| {
        if request == DEFAULT_STATUS_REQUEST {
            return Reply::Send(DEFAULT_STATUS_RESPONSE.to_vec());
        }
        let body = loadings_for(request, wells).into_bytes();
        match delay {
            Some(delay) => Reply::Delayed(delay, body),
            None => Reply::Send(body),
        }
    })
}

/// Well-major loadings for the `n_years` in a job command.
pub fn loadings_for(request: &[u8], wells: u32) -> String {
    let text = String::from_utf8_lossy(request);
    let n_years: u32 = text
        .split_whitespace()
        .next()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let mut values = Vec::new();
    for well in 0..wells {
        for year in 0..n_years {
            values.push(format!("{}", well * 1000 + year));
        }
    }
    values.join(" ")
}

/// A loopback address nothing listens on.
pub async fn unused_server() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Server::new("127.0.0.1", port)
}

/// Config with timeouts short enough for tests.
pub fn test_config(servers: Vec<Server>) -> DispatcherConfig {
    DispatcherConfig {
        servers,
        connect_timeout_ms: 500,
        write_timeout_ms: 500,
        read_timeout_ms: 1_000,
        probe: ProbeConfig {
            timeout_ms: 300,
            interval_ms: 100,
            ..ProbeConfig::default()
        },
        sweep_interval_ms: 50,
        ..DispatcherConfig::default()
    }
}

pub fn spec(n_years: u32, modifications: &[(u16, &str)]) -> RunSpec {
    RunSpec {
        name: "test run".to_string(),
        description: None,
        n_years,
        reduction_year: 2025,
        water_content: "0.05".parse().unwrap(),
        scenario_name: "CVHM_95_99".to_string(),
        area: Default::default(),
        modifications: modifications
            .iter()
            .map(|(crop, p)| Modification::new(*crop, p.parse::<Decimal4>().unwrap()))
            .collect(),
        unsaturated_zone_travel_time: None,
    }
}

pub fn ready_run(spec: RunSpec) -> Arc<Run> {
    let run = Arc::new(Run::new(spec));
    run.mark_ready().unwrap();
    run
}

/// Pool, store and dispatcher wired together.
pub struct Harness {
    pub config: DispatcherConfig,
    pub pool: Arc<ServerPool>,
    pub store: Arc<MemoryRunStore>,
    pub dispatcher: Arc<RunDispatcher>,
}

impl Harness {
    pub fn new(servers: Vec<Server>) -> Self {
        Self::with_config(test_config(servers))
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        let pool = Arc::new(ServerPool::from_config(&config));
        let store = Arc::new(MemoryRunStore::new());
        let dispatcher = Arc::new(RunDispatcher::new(&config, pool.clone(), store.clone()));
        Self {
            config,
            pool,
            store,
            dispatcher,
        }
    }

    /// Mark every server online without probing.
    pub fn all_online(&self) {
        for server in &self.config.servers {
            self.pool.mark_online(server);
        }
    }
}
