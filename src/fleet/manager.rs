//! Fleet manager
//!
//! Owns every forward server in the process and reconciles three views of
//! the world: the desired state, the in-memory servers, and what the OS
//! reports as listening. The first two diverge after a process restart
//! (desired ports persist, servers do not), so neither is assumed to match.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::report::{parse_port, split_port_list, ForwardEntry, Report};
use crate::config::ForwardConfig;
use crate::error::{ForwardError, ForwardResult};
use crate::forward::{ForwardServer, ForwardTarget, ServerStatus, SessionInfo, StatsSnapshot};
use crate::pool::{RelayBufferPool, RelayBufferPoolStats};
use crate::probe::ListeningProbe;
use crate::state::DesiredState;

/// Manages all forward servers for one remote target
pub struct FleetManager {
    config: Arc<ForwardConfig>,
    state: Arc<dyn DesiredState>,
    probe: Arc<dyn ListeningProbe>,
    pool: RelayBufferPool,
    servers: DashMap<u16, Arc<ForwardServer>>,
    /// Background accept loops, joined on stop
    tasks: Mutex<HashMap<u16, JoinHandle<()>>>,
}

impl FleetManager {
    pub fn new(
        config: ForwardConfig,
        state: Arc<dyn DesiredState>,
        probe: Arc<dyn ListeningProbe>,
        pool: RelayBufferPool,
    ) -> Self {
        Self {
            config: Arc::new(config),
            state,
            probe,
            pool,
            servers: DashMap::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of in-memory servers
    pub fn managed_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server(&self, port: u16) -> Option<Arc<ForwardServer>> {
        self.servers.get(&port).map(|s| Arc::clone(s.value()))
    }

    pub fn status(&self, port: u16) -> Option<ServerStatus> {
        self.server(port).map(|s| s.status())
    }

    pub fn sessions(&self, port: u16) -> Option<Vec<SessionInfo>> {
        self.server(port).map(|s| s.sessions())
    }

    /// Usage of the relay buffers shared by every server
    pub fn buffer_pool_stats(&self) -> RelayBufferPoolStats {
        self.pool.stats()
    }

    /// Register a (not yet started) forward for `port` and persist it
    pub fn create_forward(&self, port: u16) -> ForwardResult<String> {
        let host = self.state.remote_target().ok_or(ForwardError::Configuration)?;

        let server = self.build_server(port, &host);
        match self.servers.entry(port) {
            Entry::Occupied(_) => return Err(ForwardError::Conflict(port)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&server));
            }
        }

        if let Err(e) = self.state.add_port(port) {
            self.servers.remove(&port);
            return Err(e.into());
        }

        info!(port, remote = %server.target().remote_addr(), "Port forward created");
        Ok(format!(
            "Port forward for {} created (-> {})",
            port,
            server.target().remote_addr()
        ))
    }

    /// Stop and discard the forward for `port`, then drop it from desired state.
    ///
    /// Succeeds for ports that were never managed.
    pub async fn remove_forward(&self, port: u16) -> ForwardResult<String> {
        if let Some(server) = self.server(port) {
            server.stop().await;
            self.join_accept_loop(port).await;
            self.servers.remove(&port);
        }

        self.state.remove_port(port)?;

        info!(port, "Port forward removed");
        Ok(format!("Port forward for {} removed", port))
    }

    /// `create_forward` for each token of a comma/whitespace separated list
    pub fn create_forwards(&self, ports: &str) -> Report {
        let mut report = Report::new("No ports provided");
        for token in split_port_list(ports) {
            match parse_port(token) {
                Ok(port) => report.push(port, self.create_forward(port)),
                Err(e) => report.push(token, Err(e)),
            }
        }
        report
    }

    /// `remove_forward` for each token of a comma/whitespace separated list
    pub async fn remove_forwards(&self, ports: &str) -> Report {
        let mut report = Report::new("No ports provided");
        for token in split_port_list(ports) {
            match parse_port(token) {
                Ok(port) => report.push(port, self.remove_forward(port).await),
                Err(e) => report.push(token, Err(e)),
            }
        }
        report
    }

    /// Every desired port with its reconciled status
    pub fn list_forwards(&self) -> Vec<ForwardEntry> {
        let listening = self.probe.listening_ports();
        // An empty probe result means the probe could not tell
        let probe_known = !listening.is_empty();
        let remote_host = self.state.remote_target();

        self.state
            .desired_ports()
            .into_iter()
            .map(|port| {
                let observed = probe_known.then(|| listening.contains(&port));

                match self.server(port) {
                    Some(server) => {
                        let status = server.status();
                        ForwardEntry {
                            port,
                            target: status.target,
                            running: observed.unwrap_or(status.running),
                            active_sessions: status.active_sessions,
                            stats: status.stats,
                            managed: true,
                        }
                    }
                    None => {
                        let host = remote_host.as_deref().unwrap_or("-");
                        let target = ForwardTarget::with_remote_port(
                            port,
                            host,
                            Some(self.state.remote_port(port)),
                        );
                        ForwardEntry {
                            port,
                            target: target.remote_addr(),
                            running: observed.unwrap_or(false),
                            active_sessions: 0,
                            stats: StatsSnapshot::default(),
                            managed: false,
                        }
                    }
                }
            })
            .collect()
    }

    /// Ensure a server exists for every desired port and launch the idle ones.
    ///
    /// Binding happens before this returns; accept loops run in the background.
    pub fn start_all(&self) -> ForwardResult<Report> {
        let mut report = Report::new("No port forwards configured");

        let ports = self.state.desired_ports();
        if ports.is_empty() {
            return Ok(report);
        }
        let host = self.state.remote_target().ok_or(ForwardError::Configuration)?;

        for port in ports {
            let server = Arc::clone(
                self.servers
                    .entry(port)
                    .or_insert_with(|| self.build_server(port, &host))
                    .value(),
            );

            if server.state().is_active() {
                report.push(port, Ok("already running".to_string()));
                continue;
            }

            match server.spawn() {
                Ok(handle) => {
                    self.tasks.lock().insert(port, handle);
                    report.push(port, Ok("started".to_string()));
                }
                Err(e) => report.push(port, Err(e)),
            }
        }

        info!(
            ports = report.lines().len(),
            failures = report.failures(),
            "Port forwards started"
        );
        Ok(report)
    }

    /// Stop every running server concurrently and wait for all of them
    pub async fn stop_all(&self) -> Report {
        let mut report = Report::new("No port forwards running");

        let running: Vec<Arc<ForwardServer>> = self
            .servers
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stopping = JoinSet::new();
        for server in running {
            stopping.spawn(async move {
                server.stop().await;
                server.port()
            });
        }

        let mut stopped = Vec::new();
        while let Some(joined) = stopping.join_next().await {
            match joined {
                Ok(port) => stopped.push(port),
                Err(e) => warn!(error = %e, "Stop task failed"),
            }
        }
        stopped.sort_unstable();

        for port in &stopped {
            self.join_accept_loop(*port).await;
            report.push(port, Ok("stopped".to_string()));
        }

        if !stopped.is_empty() {
            info!(count = stopped.len(), "Port forwards stopped");
        }
        report
    }

    /// `stop_all`, settle, then `start_all`
    pub async fn restart_all(&self) -> ForwardResult<Report> {
        self.stop_all().await;
        tokio::time::sleep(self.config.restart_settle()).await;
        self.start_all()
    }

    /// Stop everything before the process exits
    pub async fn shutdown(&self) {
        let report = self.stop_all().await;
        debug!(stopped = report.lines().len(), "Fleet shut down");
    }

    fn build_server(&self, port: u16, host: &str) -> Arc<ForwardServer> {
        let target = ForwardTarget::with_remote_port(port, host, Some(self.state.remote_port(port)));
        Arc::new(ForwardServer::new(
            target,
            Arc::clone(&self.config),
            self.pool.clone(),
        ))
    }

    async fn join_accept_loop(&self, port: u16) {
        let handle = self.tasks.lock().remove(&port);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(port, error = %e, "Accept loop task failed");
            }
        }
    }
}
