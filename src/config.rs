//! Configuration management
//!
//! Handles loading and validating forwarder configuration from TOML files.
//! Every section is optional; missing values fall back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub forward: ForwardConfig,
    pub pool: PoolConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Async runtime configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = auto)
    pub workers: usize,
}

impl RuntimeConfig {
    /// Get effective worker count (auto-detect if 0)
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// Forwarding engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Desired-state file (remote target + forwarded ports)
    pub state_path: PathBuf,
    /// Outbound connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum bytes moved per read/write in a relay loop
    pub buffer_size: usize,
    /// Idle session timeout in seconds (0 = never)
    pub idle_timeout_secs: u64,
    /// Concurrent sessions allowed per port (0 = unlimited)
    pub max_sessions_per_port: usize,
    /// Pause between stop and start during a restart
    pub restart_settle_ms: u64,
    /// Listen backlog for forwarding sockets
    pub listen_backlog: i32,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            connect_timeout_secs: 10,
            buffer_size: 64 * 1024,
            idle_timeout_secs: 0,
            max_sessions_per_port: 0,
            restart_settle_ms: 1000,
            listen_backlog: 1024,
        }
    }
}

impl ForwardConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn max_sessions(&self) -> Option<usize> {
        (self.max_sessions_per_port > 0).then_some(self.max_sessions_per_port)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }
}

/// Relay buffer pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of pre-allocated relay buffers
    pub relay_buffers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { relay_buffers: 256 }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    pub enabled: bool,
    /// Prometheus exporter bind address
    pub bind_addr: SocketAddr,
    /// JSON status API bind address
    pub api_addr: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            api_addr: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Output format: "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/linkfwd/state.toml")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&contents)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.forward.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be > 0");
        }
        if self.forward.buffer_size == 0 {
            anyhow::bail!("buffer_size must be > 0");
        }
        if self.forward.listen_backlog <= 0 {
            anyhow::bail!("listen_backlog must be > 0");
        }
        Ok(())
    }
}
