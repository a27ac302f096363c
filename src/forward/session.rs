//! Relay session
//!
//! One accepted client connection paired with one outbound connection to the
//! forward target. Two copy loops move bytes in each direction; whichever
//! finishes first (EOF, I/O error, idle timeout) closes the other, so a
//! session never lingers with one half blocked on a dead peer.

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, trace};

use super::stats::ServerStats;
use super::target::ForwardTarget;
use crate::error::{ForwardError, ForwardResult};
use crate::metrics::METRICS;
use crate::pool::RelayBufferPool;

/// Unique session identifier (per server)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Copy direction within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client -> remote
    Upstream,
    /// Remote -> client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client->remote"),
            Direction::Downstream => f.write_str("remote->client"),
        }
    }
}

/// Why a copy loop ended without an I/O error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    Eof,
    Idle,
    Cancelled,
}

/// Everything a session needs from its owning server
pub(crate) struct RelayContext {
    pub stats: ServerStats,
    pub pool: RelayBufferPool,
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

/// A client connection and its outbound leg.
pub struct Session {
    id: SessionId,
    target: Arc<ForwardTarget>,
    peer: SocketAddr,
    created_at: SystemTime,
    started: Instant,
    /// Millis since `started` of the last successful write
    last_active_ms: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Session {
    pub fn new(id: SessionId, target: Arc<ForwardTarget>, peer: SocketAddr) -> Self {
        Self {
            id,
            target,
            peer,
            created_at: SystemTime::now(),
            started: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes relayed client -> remote
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Bytes relayed remote -> client
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since the last byte was relayed in either direction
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.to_string(),
            port: self.target.port,
            remote_host: self.target.remote_host.clone(),
            remote_port: self.target.remote_port,
            peer: self.peer.to_string(),
            created_at_unix_ms: self
                .created_at
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_millis() as u64),
            duration_secs: self.duration().as_secs_f64(),
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
        }
    }

    /// Open the outbound leg and relay until both directions are done.
    ///
    /// Failures are counted on the owning server and logged; they never
    /// propagate to the accept loop.
    pub(crate) async fn run(&self, client: TcpStream, ctx: &RelayContext) {
        let remote = match self.connect(ctx.connect_timeout).await {
            Ok(remote) => remote,
            Err(e) => {
                ctx.stats.record_error();
                error!(
                    session_id = %self.id,
                    port = self.target.port,
                    peer = %self.peer,
                    error = %e,
                    "Outbound connect failed"
                );
                // Dropping the client closes the accepted connection
                return;
            }
        };

        self.relay(client, remote, ctx).await;
    }

    async fn connect(&self, timeout: Duration) -> ForwardResult<TcpStream> {
        let connect = TcpStream::connect((self.target.remote_host.as_str(), self.target.remote_port));

        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => {
                debug!(session_id = %self.id, target = %self.target.remote_addr(), "Connected to target");
                Ok(stream)
            }
            Ok(Err(source)) => {
                METRICS.connect_failed();
                Err(ForwardError::Connect {
                    target: self.target.remote_addr(),
                    source,
                })
            }
            Err(_) => {
                METRICS.connect_timeout();
                Err(ForwardError::ConnectTimeout {
                    target: self.target.remote_addr(),
                    timeout,
                })
            }
        }
    }

    async fn relay(&self, client: TcpStream, remote: TcpStream, ctx: &RelayContext) {
        let _ = client.set_nodelay(true);
        let _ = remote.set_nodelay(true);

        let (mut client_read, mut client_write) = client.into_split();
        let (mut remote_read, mut remote_write) = remote.into_split();

        // Raised by whichever loop ends first
        let (closed_tx, _) = watch::channel(false);
        let upstream_closed = closed_tx.subscribe();
        let downstream_closed = closed_tx.subscribe();

        let (upstream, downstream) = tokio::join!(
            self.pump(
                Direction::Upstream,
                &mut client_read,
                &mut remote_write,
                upstream_closed,
                &closed_tx,
                ctx,
            ),
            self.pump(
                Direction::Downstream,
                &mut remote_read,
                &mut client_write,
                downstream_closed,
                &closed_tx,
                ctx,
            ),
        );

        for outcome in [upstream, downstream] {
            match outcome {
                Ok(PumpEnd::Idle) => {
                    METRICS.idle_timeout();
                    debug!(session_id = %self.id, idle = ?self.idle_for(), "Session idle timeout");
                }
                Ok(end) => trace!(session_id = %self.id, ?end, "Relay loop ended"),
                Err(e) => {
                    ctx.stats.record_error();
                    METRICS.relay_error();
                    debug!(session_id = %self.id, port = self.target.port, error = %e, "Relay error");
                }
            }
        }

        // Best-effort close of both legs; the halves drop right after
        let _ = client_write.shutdown().await;
        let _ = remote_write.shutdown().await;
    }

    /// Copy `src` into `dst` until EOF, error, idle timeout or cancellation
    async fn pump<R, W>(
        &self,
        direction: Direction,
        src: &mut R,
        dst: &mut W,
        mut closed: watch::Receiver<bool>,
        close: &watch::Sender<bool>,
        ctx: &RelayContext,
    ) -> ForwardResult<PumpEnd>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = ctx.pool.acquire();

        let result = loop {
            let read = tokio::select! {
                _ = closed.changed() => break Ok(PumpEnd::Cancelled),
                read = self.read_chunk(src, &mut buf, ctx.idle_timeout) => read,
            };

            let n = match read {
                Ok(Some(0)) => break Ok(PumpEnd::Eof),
                Ok(Some(n)) => n,
                Ok(None) => break Ok(PumpEnd::Idle),
                Err(source) => break Err(ForwardError::Relay { direction, source }),
            };

            tokio::select! {
                _ = closed.changed() => break Ok(PumpEnd::Cancelled),
                written = dst.write_all(&buf[..n]) => {
                    if let Err(source) = written {
                        break Err(ForwardError::Relay { direction, source });
                    }
                }
            }

            self.record(direction, n as u64, &ctx.stats);
        };

        close.send_replace(true);
        result
    }

    /// Read one chunk; `Ok(None)` once the whole session has been idle too long
    async fn read_chunk<R>(
        &self,
        src: &mut R,
        buf: &mut [u8],
        idle_timeout: Option<Duration>,
    ) -> std::io::Result<Option<usize>>
    where
        R: AsyncRead + Unpin,
    {
        let Some(idle_timeout) = idle_timeout else {
            return src.read(buf).await.map(Some);
        };

        loop {
            match tokio::time::timeout(idle_timeout, src.read(buf)).await {
                Ok(read) => return read.map(Some),
                // The other direction may still be busy
                Err(_) if self.idle_for() < idle_timeout => continue,
                Err(_) => return Ok(None),
            }
        }
    }

    fn record(&self, direction: Direction, bytes: u64, stats: &ServerStats) {
        match direction {
            Direction::Upstream => {
                self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
                stats.record_sent(bytes);
                METRICS.upstream(bytes);
            }
            Direction::Downstream => {
                self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
                stats.record_received(bytes);
                METRICS.downstream(bytes);
            }
        }
        self.last_active_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

/// Serializable session snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session ID (hex string)
    pub id: String,
    pub port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    /// Client IP:port
    pub peer: String,
    pub created_at_unix_ms: u64,
    pub duration_secs: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
