use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::{DEFAULT_STATUS_REQUEST, DEFAULT_STATUS_RESPONSE};
use crate::run::AreaKindMap;

/// Port Mantis listens on unless told otherwise.
pub const DEFAULT_MANTIS_PORT: u16 = 1234;

/// A Mantis simulation server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Server {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Server {
    type Err = ConfigError;

    /// Parses `host:port` or a bare `host` (default Mantis port).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::invalid("server", "empty address"));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ConfigError::invalid("server", format!("bad port in {s:?}")))?;
                if host.is_empty() {
                    return Err(ConfigError::invalid("server", format!("missing host in {s:?}")));
                }
                Ok(Server::new(host, port))
            }
            None => Ok(Server::new(s, DEFAULT_MANTIS_PORT)),
        }
    }
}

/// Order in which Mantis streams loading values back.
///
/// The wire carries no tags, so the layout is a contract with the
/// simulator build and has to be configured, never guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultOrder {
    /// Outer loop over wells, inner loop over years.
    #[default]
    WellMajor,
    /// Outer loop over years, inner loop over wells.
    YearMajor,
}

impl FromStr for ResultOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "well-major" | "well_major" | "wells" => Ok(ResultOrder::WellMajor),
            "year-major" | "year_major" | "years" => Ok(ResultOrder::YearMajor),
            other => Err(ConfigError::invalid(
                "result order",
                format!("expected well-major or year-major, got {other:?}"),
            )),
        }
    }
}

/// Health probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Ceiling for a single probe round trip
    pub timeout_ms: u64,
    /// Interval between pool-wide refreshes in the service loop
    pub interval_ms: u64,
    /// Payload sent to ask a server for its status
    pub request: Vec<u8>,
    /// Exact payload an online server answers with
    pub expected_response: Vec<u8>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            interval_ms: 30_000,
            request: DEFAULT_STATUS_REQUEST.to_vec(),
            expected_response: DEFAULT_STATUS_RESPONSE.to_vec(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub servers: Vec<Server>,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Hard ceiling on waiting for Mantis to close the connection.
    pub read_timeout_ms: u64,
    pub max_response_bytes: usize,
    pub probe: ProbeConfig,
    pub sweep_interval_ms: u64,
    pub max_concurrent_dispatches: usize,
    pub result_order: ResultOrder,
    pub area_kinds: AreaKindMap,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            connect_timeout_ms: 5_000,
            write_timeout_ms: 10_000,
            read_timeout_ms: 600_000,
            max_response_bytes: 64 * 1024 * 1024,
            probe: ProbeConfig::default(),
            sweep_interval_ms: 5_000,
            max_concurrent_dispatches: 4,
            result_order: ResultOrder::default(),
            area_kinds: AreaKindMap::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.servers.push(Server::new(host, port));
        self
    }

    pub fn with_result_order(mut self, order: ResultOrder) -> Self {
        self.result_order = order;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `MANTIS_SERVERS` - comma-separated `host[:port]` list (default: none)
    /// - `MANTIS_CONNECT_TIMEOUT_MS` - connect timeout (default: 5000)
    /// - `MANTIS_WRITE_TIMEOUT_MS` - command write timeout (default: 10000)
    /// - `MANTIS_READ_TIMEOUT_MS` - result read ceiling (default: 600000)
    /// - `MANTIS_MAX_RESPONSE_BYTES` - largest accepted response (default: 64 MiB)
    /// - `MANTIS_PROBE_TIMEOUT_MS` - per-probe timeout (default: 3000)
    /// - `MANTIS_PROBE_INTERVAL_MS` - probe refresh interval (default: 30000)
    /// - `MANTIS_SWEEP_INTERVAL_MS` - Ready-run sweep interval (default: 5000)
    /// - `MANTIS_MAX_CONCURRENT` - concurrent dispatches (default: 4)
    /// - `MANTIS_RESULT_ORDER` - `well-major` or `year-major` (default: well-major)
    /// - `MANTIS_STATUS_MESSAGE` / `MANTIS_STATUS_RESPONSE` - probe payloads
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(list) = lookup("MANTIS_SERVERS") {
            config.servers = list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()?;
        }

        let number = |key: &str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::invalid(key, format!("not a number: {v:?}"))),
                None => Ok(default),
            }
        };

        config.connect_timeout_ms = number("MANTIS_CONNECT_TIMEOUT_MS", config.connect_timeout_ms)?;
        config.write_timeout_ms = number("MANTIS_WRITE_TIMEOUT_MS", config.write_timeout_ms)?;
        config.read_timeout_ms = number("MANTIS_READ_TIMEOUT_MS", config.read_timeout_ms)?;
        config.max_response_bytes =
            number("MANTIS_MAX_RESPONSE_BYTES", config.max_response_bytes as u64)? as usize;
        config.probe.timeout_ms = number("MANTIS_PROBE_TIMEOUT_MS", config.probe.timeout_ms)?;
        config.probe.interval_ms = number("MANTIS_PROBE_INTERVAL_MS", config.probe.interval_ms)?;
        config.sweep_interval_ms = number("MANTIS_SWEEP_INTERVAL_MS", config.sweep_interval_ms)?;
        config.max_concurrent_dispatches =
            number("MANTIS_MAX_CONCURRENT", config.max_concurrent_dispatches as u64)? as usize;

        if config.max_concurrent_dispatches == 0 {
            return Err(ConfigError::invalid("MANTIS_MAX_CONCURRENT", "must be at least 1"));
        }
        if config.probe.interval_ms == 0 {
            return Err(ConfigError::invalid("MANTIS_PROBE_INTERVAL_MS", "must be positive"));
        }
        if config.sweep_interval_ms == 0 {
            return Err(ConfigError::invalid("MANTIS_SWEEP_INTERVAL_MS", "must be positive"));
        }

        if let Some(order) = lookup("MANTIS_RESULT_ORDER") {
            config.result_order = order.parse()?;
        }
        if let Some(message) = lookup("MANTIS_STATUS_MESSAGE") {
            config.probe.request = message.into_bytes();
        }
        if let Some(response) = lookup("MANTIS_STATUS_RESPONSE") {
            config.probe.expected_response = response.into_bytes();
        }

        Ok(config)
    }
}
