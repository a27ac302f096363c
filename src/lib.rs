//! Linkfwd - TCP port forwarding engine
//!
//! Exposes local TCP ports that each relay, byte for byte, to a fixed
//! remote host:port, so services on one side of a point-to-point link are
//! reachable from the other.

pub mod config;
pub mod error;
pub mod fleet;
pub mod forward;
pub mod metrics;
pub mod pool;
pub mod probe;
pub mod state;
pub mod util;

pub use config::Config;
pub use error::{ForwardError, ForwardResult};
pub use fleet::FleetManager;

/// Version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
