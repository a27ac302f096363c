//! `/proc/net/tcp{,6}` listening-socket enumeration

use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, trace};

use super::ListeningProbe;

/// TCP_LISTEN in the kernel's hex state column
const TCP_LISTEN: &str = "0A";

/// Probe that reads the kernel's TCP socket tables.
#[derive(Debug, Clone)]
pub struct ProcfsProbe {
    tables: Vec<PathBuf>,
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::with_tables(["/proc/net/tcp", "/proc/net/tcp6"])
    }
}

impl ProcfsProbe {
    /// Probe a custom set of socket tables (same format as `/proc/net/tcp`)
    pub fn with_tables<I, P>(tables: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }
}

impl ListeningProbe for ProcfsProbe {
    fn listening_ports(&self) -> HashSet<u16> {
        let mut ports = HashSet::new();

        for table in &self.tables {
            match std::fs::read_to_string(table) {
                Ok(content) => ports.extend(parse_listening(&content)),
                Err(e) => debug!(table = ?table, error = %e, "Socket table unreadable"),
            }
        }

        trace!(count = ports.len(), "Listening ports probed");
        ports
    }
}

/// Extract listening ports from a `/proc/net/tcp`-formatted table.
///
/// ```text
///   sl  local_address rem_address   st ...
///    0: 00000000:0016 00000000:0000 0A ...
/// ```
fn parse_listening(content: &str) -> impl Iterator<Item = u16> + '_ {
    content.lines().skip(1).filter_map(|line| {
        let mut fields = line.split_whitespace();
        let local = fields.nth(1)?;
        let state = fields.nth(1)?;
        if state != TCP_LISTEN {
            return None;
        }
        let (_, port_hex) = local.rsplit_once(':')?;
        u16::from_str_radix(port_hex, 16).ok()
    })
}
