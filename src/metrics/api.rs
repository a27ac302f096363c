//! HTTP API for forward monitoring
//!
//! Provides JSON endpoints for viewing forwarded ports and process totals.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::counters::{MetricsSnapshot, METRICS};
use crate::fleet::{FleetManager, ForwardEntry};
use crate::pool::RelayBufferPoolStats;

/// API response for /forwards endpoint
#[derive(Serialize)]
struct ForwardsResponse {
    count: usize,
    forwards: Vec<ForwardEntry>,
}

/// API response for /stats endpoint
#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    relay: MetricsSnapshot,
    buffer_pool: RelayBufferPoolStats,
}

/// Start the status API server on a background thread.
///
/// - GET /forwards - Reconciled list of forwarded ports
/// - GET /stats - Process-wide relay totals and buffer pool usage
pub fn start_api_server(addr: SocketAddr, fleet: Arc<FleetManager>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!(%addr, "Status API server started");

    thread::Builder::new()
        .name("linkfwd-api".to_string())
        .spawn(move || run_api_server(listener, fleet))?;
    Ok(())
}

fn run_api_server(listener: TcpListener, fleet: Arc<FleetManager>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let fleet = fleet.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_request(stream, &fleet) {
                        debug!(error = %e, "Request handling error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept API connection");
            }
        }
    }
    error!("Status API listener closed");
}

fn handle_request(mut stream: TcpStream, fleet: &FleetManager) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer)?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let (status, body) = route(&request, fleet);

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// Map a raw request to `(status line, JSON body)`
fn route(request: &str, fleet: &FleetManager) -> (&'static str, String) {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    match path {
        "/forwards" => {
            let forwards = fleet.list_forwards();
            let response = ForwardsResponse {
                count: forwards.len(),
                forwards,
            };
            ("200 OK", to_json(&response))
        }
        "/stats" => {
            let response = StatsResponse {
                relay: METRICS.snapshot(),
                buffer_pool: fleet.buffer_pool_stats(),
            };
            ("200 OK", to_json(&response))
        }
        "/" => {
            let help = r#"{
  "endpoints": {
    "/forwards": "List forwarded ports",
    "/stats": "Relay statistics"
  }
}"#;
            ("200 OK", help.to_string())
        }
        _ => ("404 Not Found", r#"{"error": "Not found"}"#.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}
