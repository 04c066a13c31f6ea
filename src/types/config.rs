//! Configuration structures.
//!
//! Configuration is loaded from defaults, an optional JSON file, and
//! `OOCRPC_*` environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::errors::{Error, Result};
use crate::protocol::frame::MIN_FRAME_BYTES;

/// Default idle-connection pool capacity on the client.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Default per-call client deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default maximum accepted frame size (length prefix included).
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 5 * 1024 * 1024;

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address (`host:port`).
    pub listen_addr: String,

    /// Maximum frame size in bytes, length prefix included.
    pub max_frame_bytes: u32,

    /// Maximum concurrent TCP connections. Connections beyond this limit
    /// are closed immediately.
    pub max_connections: usize,

    /// Upper bound on a single method invocation. The caller receives a
    /// `Timeout` error; the invocation itself is not cancelled.
    #[serde(with = "humantime_serde")]
    pub invocation_timeout: Duration,

    /// Per-frame write deadline. Slow consumers are dropped.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Drop connections that send nothing for this long. `None` keeps idle
    /// connections open, which pooled clients rely on.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,

    /// Maximum number of encode buffers kept on the server free list.
    pub buffer_pool_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9091".to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_connections: 1000,
            invocation_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            idle_timeout: None,
            buffer_pool_size: 64,
        }
    }
}

impl ServerConfig {
    /// Build from a host and port.
    pub fn with_host_port(host: &str, port: u16) -> Self {
        Self {
            listen_addr: format!("{host}:{port}"),
            ..Self::default()
        }
    }

    /// Reject limits the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 || self.max_connections > Semaphore::MAX_PERMITS {
            return Err(Error::config(format!(
                "max_connections must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                self.max_connections
            )));
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(Error::config(format!(
                "max_frame_bytes must be at least {}, got {}",
                MIN_FRAME_BYTES, self.max_frame_bytes
            )));
        }
        Ok(())
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address to dial (`host:port`).
    pub server_addr: String,

    /// Idle connections kept for reuse. Excess connections are closed.
    pub pool_capacity: usize,

    /// Deadline covering dial, request write, and response read.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Maximum accepted response frame size.
    pub max_frame_bytes: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9091".to_string(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Self::default()
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing sections take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid config {}: {}", path.display(), e)))?;
        config.server.validate()?;
        Ok(config)
    }

    /// Defaults with `OOCRPC_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("OOCRPC_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(addr) = lookup("OOCRPC_SERVER_ADDR") {
            self.client.server_addr = addr;
        }
        if let Some(raw) = lookup("OOCRPC_POOL_CAPACITY") {
            self.client.pool_capacity = raw
                .parse()
                .map_err(|_| Error::config(format!("OOCRPC_POOL_CAPACITY: invalid value {raw:?}")))?;
        }
        if let Some(raw) = lookup("OOCRPC_CALL_TIMEOUT") {
            self.client.call_timeout = humantime::parse_duration(&raw)
                .map_err(|e| Error::config(format!("OOCRPC_CALL_TIMEOUT: {e}")))?;
        }
        if let Some(raw) = lookup("OOCRPC_MAX_FRAME_BYTES") {
            let max: u32 = raw
                .parse()
                .map_err(|_| Error::config(format!("OOCRPC_MAX_FRAME_BYTES: invalid value {raw:?}")))?;
            self.server.max_frame_bytes = max;
            self.client.max_frame_bytes = max;
        }
        if let Some(level) = lookup("OOCRPC_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        Ok(())
    }
}
