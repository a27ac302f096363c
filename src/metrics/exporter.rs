//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    describe_counter!("linkfwd_sessions_total", "Total client connections accepted");
    describe_gauge!("linkfwd_sessions_active", "Currently active sessions");
    describe_counter!("linkfwd_sessions_rejected", "Connections refused by the session limit");
    describe_counter!("linkfwd_connect_failures", "Outbound connect failures");
    describe_counter!("linkfwd_connect_timeouts", "Outbound connect timeouts");
    describe_counter!("linkfwd_bytes_upstream", "Bytes relayed client to remote");
    describe_counter!("linkfwd_bytes_downstream", "Bytes relayed remote to client");
    describe_counter!("linkfwd_relay_errors", "I/O errors while relaying");
    describe_counter!("linkfwd_idle_timeouts", "Sessions closed for inactivity");
    describe_counter!("linkfwd_bind_failures", "Listening socket bind failures");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Sync atomic counters into the metrics registry
    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Background task that periodically pushes counter deltas to the registry
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;

        let snapshot = METRICS.snapshot();

        let deltas = [
            ("linkfwd_sessions_total", snapshot.sessions_total, last.sessions_total),
            ("linkfwd_sessions_rejected", snapshot.sessions_rejected, last.sessions_rejected),
            ("linkfwd_connect_failures", snapshot.connect_failures, last.connect_failures),
            ("linkfwd_connect_timeouts", snapshot.connect_timeouts, last.connect_timeouts),
            ("linkfwd_bytes_upstream", snapshot.bytes_upstream, last.bytes_upstream),
            ("linkfwd_bytes_downstream", snapshot.bytes_downstream, last.bytes_downstream),
            ("linkfwd_relay_errors", snapshot.relay_errors, last.relay_errors),
            ("linkfwd_idle_timeouts", snapshot.idle_timeouts, last.idle_timeouts),
            ("linkfwd_bind_failures", snapshot.bind_failures, last.bind_failures),
        ];

        for (name, now, before) in deltas {
            let delta = now.saturating_sub(before);
            if delta > 0 {
                counter!(name).increment(delta);
            }
        }

        gauge!("linkfwd_sessions_active").set(snapshot.sessions_active as f64);

        last = snapshot;
    }
}
