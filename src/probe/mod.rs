//! Listening-port probe
//!
//! Independent view of which TCP ports the operating system reports as
//! listening. Used to reconcile desired state with reality after a restart,
//! when no in-memory server exists for a port that may still be served.

mod procfs;

pub use procfs::ProcfsProbe;

use std::collections::HashSet;
use std::sync::Arc;

/// Enumerates listening TCP ports.
///
/// An empty result means "unknown", never "nothing is listening".
pub trait ListeningProbe: Send + Sync {
    fn listening_ports(&self) -> HashSet<u16>;
}

/// Probe that never knows anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

impl ListeningProbe for NullProbe {
    fn listening_ports(&self) -> HashSet<u16> {
        HashSet::new()
    }
}

/// Best probe for the current platform
pub fn default_probe() -> Arc<dyn ListeningProbe> {
    if cfg!(target_os = "linux") {
        Arc::new(ProcfsProbe::default())
    } else {
        Arc::new(NullProbe)
    }
}
