//! Atomic counters for hot-path metrics
//!
//! Process-wide totals across every forwarding port. Per-port figures live
//! in each server's own stats.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Session metrics
    pub sessions_total: AtomicU64,
    pub sessions_active: AtomicU64,
    pub sessions_rejected: AtomicU64,

    // Outbound leg
    pub connect_failures: AtomicU64,
    pub connect_timeouts: AtomicU64,

    // Traffic metrics
    pub bytes_upstream: AtomicU64,
    pub bytes_downstream: AtomicU64,

    // Error metrics
    pub relay_errors: AtomicU64,
    pub idle_timeouts: AtomicU64,
    pub bind_failures: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            connect_timeouts: AtomicU64::new(0),
            bytes_upstream: AtomicU64::new(0),
            bytes_downstream: AtomicU64::new(0),
            relay_errors: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            bind_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn session_opened(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connect_timeout(&self) {
        self.connect_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn upstream(&self, count: u64) {
        self.bytes_upstream.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn downstream(&self, count: u64) {
        self.bytes_downstream.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn relay_error(&self) {
        self.relay_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bind_failed(&self) {
        self.bind_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connect_timeouts: self.connect_timeouts.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
            relay_errors: self.relay_errors.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            bind_failures: self.bind_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_total: u64,
    pub sessions_active: u64,
    pub sessions_rejected: u64,
    pub connect_failures: u64,
    pub connect_timeouts: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
    pub relay_errors: u64,
    pub idle_timeouts: u64,
    pub bind_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_gauge() {
        let metrics = Metrics::new();
        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.sessions_total, 2);
        assert_eq!(snap.sessions_active, 1);
    }

    #[test]
    fn test_traffic_totals() {
        let metrics = Metrics::new();
        metrics.upstream(100);
        metrics.upstream(28);
        metrics.downstream(4096);

        let snap = metrics.snapshot();
        assert_eq!(snap.bytes_upstream, 128);
        assert_eq!(snap.bytes_downstream, 4096);
    }
}
