//! Forwarding engine
//!
//! A [`ForwardServer`] owns one listening port and relays every accepted
//! connection to a fixed remote target through a [`Session`].

mod server;
mod session;
mod stats;
mod target;

pub use server::{ForwardServer, ServerState, ServerStatus};
pub use session::{Direction, Session, SessionId, SessionInfo};
pub use stats::{ServerStats, StatsSnapshot};
pub use target::ForwardTarget;
