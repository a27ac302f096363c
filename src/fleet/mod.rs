//! Fleet orchestration
//!
//! Single-port and batch operations plus fleet-wide start/stop/restart
//! across every forwarded port.

mod manager;
mod report;

pub use manager::FleetManager;
pub use report::{parse_port, split_port_list, ForwardEntry, Report, ReportLine};
