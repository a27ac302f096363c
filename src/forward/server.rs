//! Forward server
//!
//! Owns the listening socket for one local port. Each accepted connection
//! becomes an independent [`Session`] task; stopping the server closes the
//! listener but lets in-flight sessions drain on their own.
//!
//! ```text
//! NotStarted -> Starting -> Running -> Stopping -> Stopped
//!                  |                                  |
//!                  +--> Failed        (start again) <-+
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::session::{RelayContext, Session, SessionId, SessionInfo};
use super::stats::StatsSnapshot;
use super::target::ForwardTarget;
use crate::config::ForwardConfig;
use crate::error::{ForwardError, ForwardResult};
use crate::metrics::METRICS;
use crate::pool::RelayBufferPool;
use crate::util::{any_addr, create_tcp_listener};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServerState {
    /// Holds (or is about to hold) a listener
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// Read-only server snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub port: u16,
    /// `host:port` of the remote end
    pub target: String,
    pub running: bool,
    pub active_sessions: usize,
    pub stats: StatsSnapshot,
}

/// Listener for one local port relaying to one remote target
pub struct ForwardServer {
    target: Arc<ForwardTarget>,
    config: Arc<ForwardConfig>,
    state: watch::Sender<ServerState>,
    /// Present while an accept loop is (about to be) running
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    relay: Arc<RelayContext>,
    next_session_id: AtomicU64,
}

impl ForwardServer {
    pub fn new(target: ForwardTarget, config: Arc<ForwardConfig>, pool: RelayBufferPool) -> Self {
        let (state, _) = watch::channel(ServerState::NotStarted);
        let relay = RelayContext {
            stats: Default::default(),
            pool,
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
        };

        Self {
            target: Arc::new(target),
            config,
            state,
            stop_tx: Mutex::new(None),
            sessions: Arc::new(DashMap::new()),
            relay: Arc::new(relay),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn port(&self) -> u16 {
        self.target.port
    }

    pub fn target(&self) -> &ForwardTarget {
        &self.target
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Bind and serve in place until [`stop`](Self::stop) is called or the
    /// returned future is dropped.
    ///
    /// A bind failure leaves the server in `Failed` and is returned as
    /// [`ForwardError::Bind`].
    pub async fn start(&self) -> ForwardResult<()> {
        let (listener, stop_rx) = self.bind()?;
        AcceptLoop::new(self, listener).run(stop_rx).await;
        Ok(())
    }

    /// Bind now and run the accept loop on a background task.
    ///
    /// The server is `Running` (or `Failed`) when this returns.
    pub fn spawn(self: &Arc<Self>) -> ForwardResult<JoinHandle<()>> {
        let (listener, stop_rx) = self.bind()?;
        let accept_loop = AcceptLoop::new(Arc::clone(self), listener);
        Ok(tokio::spawn(accept_loop.run(stop_rx)))
    }

    /// Stop accepting and release the listener.
    ///
    /// Waits until the accept loop has exited. In-flight sessions keep
    /// running. No-op unless the server is serving.
    pub async fn stop(&self) {
        let stop_tx = self.stop_tx.lock().take();
        let Some(stop_tx) = stop_tx else {
            return;
        };

        self.state.send_if_modified(|state| {
            let serving = *state == ServerState::Running;
            if serving {
                *state = ServerState::Stopping;
            }
            serving
        });
        stop_tx.send_replace(true);
        drop(stop_tx);

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| !s.is_active()).await;
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            port: self.target.port,
            target: self.target.remote_addr(),
            running: self.is_running(),
            active_sessions: self.sessions.len(),
            stats: self.relay.stats.snapshot(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.relay.stats.snapshot()
    }

    /// Snapshots of the sessions currently relaying
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.value().info()).collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    fn bind(&self) -> ForwardResult<(TcpListener, watch::Receiver<bool>)> {
        let port = self.target.port;

        // Held across the bind so a concurrent stop() sees a consistent slot
        let mut stop_slot = self.stop_tx.lock();

        let began = self.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            *state = ServerState::Starting;
            true
        });
        if !began {
            return Err(ForwardError::AlreadyRunning(port));
        }

        match create_tcp_listener(any_addr(port), self.config.listen_backlog) {
            Ok(listener) => {
                let (stop_tx, stop_rx) = watch::channel(false);
                *stop_slot = Some(stop_tx);
                self.state.send_replace(ServerState::Running);
                info!(
                    port,
                    remote = %self.target.remote_addr(),
                    "Forward server listening on 0.0.0.0:{}", port
                );
                Ok((listener, stop_rx))
            }
            Err(source) => {
                self.state.send_replace(ServerState::Failed);
                self.relay.stats.record_error();
                METRICS.bind_failed();
                warn!(port, error = %source, "Failed to bind/listen");
                Err(ForwardError::Bind { port, source })
            }
        }
    }

    /// Register a session for an accepted connection and spawn its relay
    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let port = self.target.port;
        self.relay.stats.record_connection();

        if let Some(max) = self.config.max_sessions() {
            if self.sessions.len() >= max {
                self.relay.stats.record_error();
                METRICS.session_rejected();
                warn!(port, %peer, max_sessions = max, "Connection rejected: at capacity");
                return;
            }
        }

        let id = SessionId::from_raw(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(id, Arc::clone(&self.target), peer));
        self.sessions.insert(id, Arc::clone(&session));
        METRICS.session_opened();

        info!(
            session_id = %id,
            %peer,
            "Forward client connected on :{} -> {}",
            port,
            self.target.remote_addr()
        );

        let sessions = Arc::clone(&self.sessions);
        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move {
            session.run(stream, &relay).await;

            sessions.remove(&session.id());
            METRICS.session_closed();
            info!(
                session_id = %session.id(),
                peer = %session.peer(),
                port,
                bytes_sent = session.bytes_sent(),
                bytes_received = session.bytes_received(),
                duration_secs = session.duration().as_secs_f64(),
                "Forward client disconnected"
            );
        });
    }
}

/// A bound listener and the server it accepts for.
///
/// Dropping it releases the listener, then returns the server to `Stopped`.
/// That happens when the loop ends, and also when its future is cancelled or
/// its task aborted, so the server can always be stopped and started again.
struct AcceptLoop<S: Deref<Target = ForwardServer>> {
    server: S,
    listener: Option<TcpListener>,
}

impl<S: Deref<Target = ForwardServer>> AcceptLoop<S> {
    fn new(server: S, listener: TcpListener) -> Self {
        Self {
            server,
            listener: Some(listener),
        }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let port = self.server.port();

        loop {
            tokio::select! {
                // Fires on stop() and if the sender is dropped
                _ = stop_rx.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.server.admit(stream, peer),
                    Err(e) => {
                        warn!(port, error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!(
            port,
            active_sessions = self.server.sessions.len(),
            "Forward server stopped"
        );
    }
}

impl<S: Deref<Target = ForwardServer>> Drop for AcceptLoop<S> {
    fn drop(&mut self) {
        // The port must be free before anyone sees a non-active state
        self.listener = None;

        let mut stop_slot = self.server.stop_tx.lock();
        stop_slot.take();
        self.server.state.send_replace(ServerState::Stopped);
    }
}
