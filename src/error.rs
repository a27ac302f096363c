//! Error types for forwarding operations.

use std::time::Duration;
use thiserror::Error;

use crate::forward::Direction;
use crate::state::StateError;

/// Errors surfaced by servers, sessions and the fleet manager.
///
/// The `Display` form doubles as the operator-facing message.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// No remote target has been configured.
    #[error("Remote forward target not configured")]
    Configuration,

    /// The port is already managed by the fleet.
    #[error("Port {0} already forwarding")]
    Conflict(u16),

    /// The server is already starting or running.
    #[error("Port {0} already running")]
    AlreadyRunning(u16),

    /// Failed to bind or listen on the local port.
    #[error("Failed to bind/listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The outbound leg could not be opened.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The outbound leg did not open within the connect timeout.
    #[error("Timeout connecting to {target} after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    /// I/O failure while relaying bytes.
    #[error("Relay {direction} failed: {source}")]
    Relay {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    /// A port token could not be parsed.
    #[error("Invalid port number '{0}'")]
    Parse(String),

    /// The desired-state collaborator could not persist a change.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Result type for forwarding operations.
pub type ForwardResult<T> = Result<T, ForwardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message() {
        let err = ForwardError::Conflict(8443);
        assert_eq!(err.to_string(), "Port 8443 already forwarding");
    }

    #[test]
    fn test_bind_message_names_port() {
        let err = ForwardError::Bind {
            port: 80,
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("80"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_parse_message_quotes_token() {
        let err = ForwardError::Parse("abc".to_string());
        assert_eq!(err.to_string(), "Invalid port number 'abc'");
    }

    #[test]
    fn test_relay_message_names_direction() {
        let err = ForwardError::Relay {
            direction: Direction::Upstream,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
        };
        assert!(err.to_string().contains("client->remote"));
    }
}
