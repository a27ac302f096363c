//! Forward target

use serde::Serialize;
use std::fmt;

/// A local port and the remote host:port it relays to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ForwardTarget {
    pub port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl ForwardTarget {
    /// Relay `port` to the same port on `remote_host`
    pub fn new(port: u16, remote_host: impl Into<String>) -> Self {
        Self::with_remote_port(port, remote_host, None)
    }

    /// Relay `port` to `remote_port` (defaults to `port`) on `remote_host`
    pub fn with_remote_port(
        port: u16,
        remote_host: impl Into<String>,
        remote_port: Option<u16>,
    ) -> Self {
        Self {
            port,
            remote_host: remote_host.into(),
            remote_port: remote_port.unwrap_or(port),
        }
    }

    /// `host:port` of the remote end, bracketing IPv6 literals
    pub fn remote_addr(&self) -> String {
        if self.remote_host.contains(':') && !self.remote_host.starts_with('[') {
            format!("[{}]:{}", self.remote_host, self.remote_port)
        } else {
            format!("{}:{}", self.remote_host, self.remote_port)
        }
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} -> {}", self.port, self.remote_addr())
    }
}
