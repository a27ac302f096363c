//! Operation reports and port-list parsing

use serde::Serialize;
use std::fmt;

use crate::error::{ForwardError, ForwardResult};
use crate::forward::StatsSnapshot;

/// One line of a report: what it is about and how it went
#[derive(Debug)]
pub struct ReportLine {
    /// Port number, or the raw token when it did not parse
    pub subject: String,
    pub outcome: ForwardResult<String>,
}

impl ReportLine {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn message(&self) -> String {
        match &self.outcome {
            Ok(msg) => msg.clone(),
            Err(e) => e.to_string(),
        }
    }
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port {}: {}", self.subject, self.message())
    }
}

/// Ordered per-item results of a batch or fleet-wide operation
#[derive(Debug)]
pub struct Report {
    lines: Vec<ReportLine>,
    empty_message: &'static str,
}

impl Report {
    /// `empty_message` is shown when the report has no lines
    pub fn new(empty_message: &'static str) -> Self {
        Self {
            lines: Vec::new(),
            empty_message,
        }
    }

    pub fn push(&mut self, subject: impl fmt::Display, outcome: ForwardResult<String>) {
        self.lines.push(ReportLine {
            subject: subject.to_string(),
            outcome,
        });
    }

    pub fn lines(&self) -> &[ReportLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.lines.iter().filter(|l| !l.is_ok()).count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            return f.write_str(self.empty_message);
        }
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// One desired port as seen by `list_forwards`
#[derive(Debug, Clone, Serialize)]
pub struct ForwardEntry {
    pub port: u16,
    /// `host:port` of the remote end (`-` host when unconfigured)
    pub target: String,
    /// Reconciled against the listening-port probe when it knows
    pub running: bool,
    pub active_sessions: usize,
    pub stats: StatsSnapshot,
    /// An in-memory server exists for this port
    pub managed: bool,
}

/// Split a comma/whitespace separated list into non-empty tokens
pub fn split_port_list(input: &str) -> impl Iterator<Item = &str> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

/// Parse one port token; 0 is not a forwardable port
pub fn parse_port(token: &str) -> ForwardResult<u16> {
    match token.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ForwardError::Parse(token.trim().to_string())),
    }
}
