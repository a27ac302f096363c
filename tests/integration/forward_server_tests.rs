//! Forward server integration tests
//!
//! Every test relays to an echo listener on 127.0.0.1 through a forward
//! bound on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

use linkfwd::config::ForwardConfig;
use linkfwd::forward::{ForwardServer, ForwardTarget, ServerState};
use linkfwd::pool::RelayBufferPool;
use linkfwd::ForwardError;

/// Port nothing is listening on right now
fn free_port() -> u16 {
    std::net::TcpListener::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Echo server on 127.0.0.1; returns its port
async fn spawn_echo() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    (port, handle)
}

fn forward_to(remote_port: u16, config: ForwardConfig) -> Arc<ForwardServer> {
    let target = ForwardTarget::with_remote_port(free_port(), "127.0.0.1", Some(remote_port));
    Arc::new(ForwardServer::new(
        target,
        Arc::new(config),
        RelayBufferPool::new(8, 16 * 1024),
    ))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 3s");
}

async fn echo_roundtrip(port: u16, payload: &[u8]) -> TcpStream {
    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(payload).await.unwrap();

    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
    client
}

#[tokio::test]
async fn test_relays_both_directions() {
    let (echo_port, _echo) = spawn_echo().await;
    let server = forward_to(echo_port, ForwardConfig::default());
    let accept_loop = assert_ok!(server.spawn());
    assert_eq!(server.state(), ServerState::Running);

    let payload = vec![0x5a; 32 * 1024];
    let client = echo_roundtrip(server.port(), &payload).await;
    assert_eq!(server.status().active_sessions, 1);
    assert_eq!(server.sessions()[0].remote_port, echo_port);

    drop(client);
    wait_until(|| server.status().active_sessions == 0).await;

    let stats = server.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.errors, 0);
    assert!(stats.total_bytes_sent >= payload.len() as u64);
    assert!(stats.total_bytes_received >= payload.len() as u64);

    server.stop().await;
    accept_loop.await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let (echo_port, _echo) = spawn_echo().await;
    let server = forward_to(echo_port, ForwardConfig::default());
    let _accept_loop = server.spawn().unwrap();

    let first = echo_roundtrip(server.port(), b"first").await;
    let mut second = echo_roundtrip(server.port(), b"second").await;
    assert_eq!(server.status().active_sessions, 2);

    drop(first);
    wait_until(|| server.status().active_sessions == 1).await;

    second.write_all(b"still here").await.unwrap();
    let mut buf = [0u8; 10];
    second.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still here");

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_remote_counts_error() {
    let server = forward_to(free_port(), ForwardConfig::default());
    let _accept_loop = server.spawn().unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let mut buf = [0u8; 16];
    let read = client.read(&mut buf).await;
    assert!(matches!(read, Ok(0) | Err(_)));

    wait_until(|| server.stats().errors == 1).await;
    assert_eq!(server.stats().connections, 1);
    assert!(server.is_running());

    server.stop().await;
}

#[tokio::test]
async fn test_bind_conflict_fails_server() {
    let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let server = Arc::new(ForwardServer::new(
        ForwardTarget::new(port, "127.0.0.1"),
        Arc::new(ForwardConfig::default()),
        RelayBufferPool::new(1, 1024),
    ));

    let err = assert_err!(server.spawn());
    assert!(matches!(err, ForwardError::Bind { port: p, .. } if p == port));
    assert_eq!(server.state(), ServerState::Failed);
    assert_eq!(server.stats().errors, 1);
    assert!(!server.status().running);
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let (echo_port, _echo) = spawn_echo().await;
    let server = forward_to(echo_port, ForwardConfig::default());
    let _accept_loop = server.spawn().unwrap();

    let err = assert_err!(server.start().await);
    assert!(matches!(err, ForwardError::AlreadyRunning(p) if p == server.port()));
    assert!(matches!(server.spawn(), Err(ForwardError::AlreadyRunning(_))));
    assert!(server.is_running());

    server.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_restartable() {
    let (echo_port, _echo) = spawn_echo().await;
    let server = forward_to(echo_port, ForwardConfig::default());

    let accept_loop = server.spawn().unwrap();
    server.stop().await;
    server.stop().await;
    accept_loop.await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);

    // Listener is released
    assert!(TcpStream::connect(("127.0.0.1", server.port())).await.is_err());

    let _accept_loop = server.spawn().unwrap();
    let client = echo_roundtrip(server.port(), b"again").await;
    drop(client);

    wait_until(|| server.status().active_sessions == 0).await;
    assert_eq!(server.stats().connections, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_in_flight_session_survives_stop() {
    let (echo_port, _echo) = spawn_echo().await;
    let server = forward_to(echo_port, ForwardConfig::default());
    let _accept_loop = server.spawn().unwrap();

    let mut client = echo_roundtrip(server.port(), b"before").await;
    server.stop().await;

    client.write_all(b"after").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"after");
}

#[tokio::test]
async fn test_session_limit_rejects_excess() {
    let (echo_port, _echo) = spawn_echo().await;
    let config = ForwardConfig {
        max_sessions_per_port: 1,
        ..Default::default()
    };
    let server = forward_to(echo_port, config);
    let _accept_loop = server.spawn().unwrap();

    let _held = echo_roundtrip(server.port(), b"held").await;

    let mut rejected = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let mut buf = [0u8; 4];
    let read = rejected.read(&mut buf).await;
    assert!(matches!(read, Ok(0) | Err(_)));

    wait_until(|| server.stats().errors == 1).await;
    assert_eq!(server.stats().connections, 2);
    assert_eq!(server.status().active_sessions, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_cancelled_start_releases_server() {
    let (echo_port, _echo) = spawn_echo().await;
    let server = forward_to(echo_port, ForwardConfig::default());

    // start() serves in place; dropping it on timeout cancels the accept loop
    let served = tokio::time::timeout(Duration::from_millis(100), server.start()).await;
    assert!(served.is_err());

    assert_eq!(server.state(), ServerState::Stopped);
    assert!(!server.is_running());
    assert!(!server.status().running);
    assert!(TcpStream::connect(("127.0.0.1", server.port())).await.is_err());

    assert_ok!(tokio::time::timeout(Duration::from_secs(2), server.stop()).await);

    let _accept_loop = assert_ok!(server.spawn());
    let client = echo_roundtrip(server.port(), b"served again").await;
    drop(client);

    server.stop().await;
}

#[tokio::test]
async fn test_aborted_accept_loop_releases_server() {
    let (echo_port, _echo) = spawn_echo().await;
    let server = forward_to(echo_port, ForwardConfig::default());

    let accept_loop = assert_ok!(server.spawn());
    accept_loop.abort();
    assert!(accept_loop.await.unwrap_err().is_cancelled());

    assert_eq!(server.state(), ServerState::Stopped);
    assert_ok!(tokio::time::timeout(Duration::from_secs(2), server.stop()).await);

    let accept_loop = assert_ok!(server.spawn());
    assert!(server.is_running());
    server.stop().await;
    accept_loop.await.unwrap();
}
