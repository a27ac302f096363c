//! Fleet manager integration tests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_ok;

use linkfwd::config::ForwardConfig;
use linkfwd::pool::RelayBufferPool;
use linkfwd::probe::NullProbe;
use linkfwd::state::{DesiredState, FileDesiredState, MemoryDesiredState};
use linkfwd::{FleetManager, ForwardError};

fn free_port() -> u16 {
    std::net::TcpListener::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn spawn_echo() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    port
}

fn test_config() -> ForwardConfig {
    ForwardConfig {
        connect_timeout_secs: 2,
        restart_settle_ms: 50,
        ..Default::default()
    }
}

fn fleet_with(state: Arc<dyn DesiredState>) -> FleetManager {
    FleetManager::new(
        test_config(),
        state,
        Arc::new(NullProbe),
        RelayBufferPool::new(8, 16 * 1024),
    )
}

/// Forward a fresh local port to a fresh echo server on 127.0.0.1
async fn echo_forward(state: &MemoryDesiredState) -> u16 {
    let echo_port = spawn_echo().await;
    let port = free_port();
    state.set_remote_port(port, echo_port);
    port
}

async fn assert_echo(port: u16, payload: &[u8]) {
    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client.write_all(payload).await.unwrap();

    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
}

fn temp_state_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "linkfwd-fleet-{}-{}.toml",
        name,
        std::process::id()
    ))
}

#[tokio::test]
async fn test_create_then_list_once() {
    let state = Arc::new(MemoryDesiredState::with_remote("127.0.0.1"));
    let fleet = fleet_with(state.clone());

    let report = fleet.create_forwards("18080, 18443");
    assert_eq!(report.failures(), 0);

    let again = fleet.create_forward(18080).unwrap_err();
    assert!(matches!(again, ForwardError::Conflict(18080)));

    let entries = fleet.list_forwards();
    let ports: Vec<u16> = entries.iter().map(|e| e.port).collect();
    assert_eq!(ports, vec![18080, 18443]);
    assert!(entries.iter().all(|e| e.managed && !e.running));
    assert_eq!(state.desired_ports(), vec![18080, 18443]);
}

#[tokio::test]
async fn test_start_all_runs_and_relays() {
    let state = Arc::new(MemoryDesiredState::with_remote("127.0.0.1"));
    let port = echo_forward(&state).await;
    let fleet = fleet_with(state.clone());
    fleet.create_forward(port).unwrap();

    let report = assert_ok!(fleet.start_all());
    assert_eq!(report.to_string(), format!("Port {}: started", port));

    let status = fleet.status(port).unwrap();
    assert!(status.running);
    assert_eq!(status.active_sessions, 0);

    assert_echo(port, b"across the link").await;
    assert_eq!(fleet.status(port).unwrap().stats.connections, 1);

    let report = fleet.start_all().unwrap();
    assert_eq!(report.to_string(), format!("Port {}: already running", port));

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_start_all_builds_servers_for_desired_ports() {
    // Desired ports from an earlier run, no servers in memory yet
    let state = Arc::new(MemoryDesiredState::with_remote("127.0.0.1"));
    let port = echo_forward(&state).await;
    state.add_port(port).unwrap();
    let fleet = fleet_with(state);
    assert_eq!(fleet.managed_count(), 0);

    let report = fleet.start_all().unwrap();
    assert_eq!(report.failures(), 0);
    assert_eq!(fleet.managed_count(), 1);
    assert_echo(port, b"rebuilt").await;

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_start_all_reports_bind_failure() {
    let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let taken = occupied.local_addr().unwrap().port();

    let state = Arc::new(MemoryDesiredState::with_remote("127.0.0.1"));
    let port = echo_forward(&state).await;
    state.add_port(taken).unwrap();
    state.add_port(port).unwrap();
    let fleet = fleet_with(state);

    let report = fleet.start_all().unwrap();
    let lines = report.lines();
    assert_eq!(lines.len(), 2);
    assert!(matches!(lines[0].outcome, Err(ForwardError::Bind { .. })));
    assert!(lines[1].is_ok());

    assert!(!fleet.status(taken).unwrap().running);
    assert_eq!(fleet.status(taken).unwrap().stats.errors, 1);
    assert!(fleet.status(port).unwrap().running);

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_stop_all_reports_each_port() {
    let state = Arc::new(MemoryDesiredState::with_remote("127.0.0.1"));
    let first = echo_forward(&state).await;
    let second = echo_forward(&state).await;
    let fleet = fleet_with(state);
    fleet.create_forward(first).unwrap();
    fleet.create_forward(second).unwrap();
    fleet.start_all().unwrap();

    let report = fleet.stop_all().await;
    assert_eq!(report.lines().len(), 2);
    assert!(report.lines().iter().all(|l| l.message() == "stopped"));

    assert!(fleet.list_forwards().iter().all(|e| !e.running));
    assert!(TcpStream::connect(("127.0.0.1", first)).await.is_err());

    let report = fleet.stop_all().await;
    assert!(report.is_empty());
    assert_eq!(report.to_string(), "No port forwards running");
}

#[tokio::test]
async fn test_restart_all_relays_again() {
    let state = Arc::new(MemoryDesiredState::with_remote("127.0.0.1"));
    let port = echo_forward(&state).await;
    let fleet = fleet_with(state);
    fleet.create_forward(port).unwrap();
    fleet.start_all().unwrap();
    assert_echo(port, b"before").await;

    let report = tokio::time::timeout(Duration::from_secs(5), fleet.restart_all())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.to_string(), format!("Port {}: started", port));

    let entries = fleet.list_forwards();
    assert!(entries[0].running);
    assert_echo(port, b"after").await;

    fleet.shutdown().await;
}

#[tokio::test]
async fn test_remove_forward_frees_port() {
    let state = Arc::new(MemoryDesiredState::with_remote("127.0.0.1"));
    let port = echo_forward(&state).await;
    let fleet = fleet_with(state.clone());
    fleet.create_forward(port).unwrap();
    fleet.start_all().unwrap();

    let msg = assert_ok!(fleet.remove_forward(port).await);
    assert_eq!(msg, format!("Port forward for {} removed", port));

    assert_eq!(fleet.managed_count(), 0);
    assert!(fleet.status(port).is_none());
    assert!(state.desired_ports().is_empty());
    assert!(fleet.list_forwards().is_empty());

    // Nothing holds the port any more
    std::net::TcpListener::bind(("0.0.0.0", port)).unwrap();
}

#[tokio::test]
async fn test_desired_state_survives_reopen() {
    let path = temp_state_path("reopen");
    let _ = std::fs::remove_file(&path);

    {
        let state = Arc::new(FileDesiredState::open(&path).unwrap());
        state.set_remote_target(Some("10.20.0.2".to_string())).unwrap();
        let fleet = fleet_with(state);

        let report = fleet.create_forwards("2222,abc,8443");
        assert_eq!(report.failures(), 1);
    }

    let state = Arc::new(FileDesiredState::open(&path).unwrap());
    assert_eq!(state.remote_target().as_deref(), Some("10.20.0.2"));
    assert_eq!(state.desired_ports(), vec![2222, 8443]);

    let fleet = fleet_with(state);
    let entries = fleet.list_forwards();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| !e.managed && !e.running));
    assert_eq!(entries[1].target, "10.20.0.2:8443");

    std::fs::remove_file(&path).unwrap();
}
