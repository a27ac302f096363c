//! Desired state
//!
//! The persisted set of forwarded ports and the remote target they relay to.
//! The fleet reads and mutates it through [`DesiredState`] and never assumes
//! it matches what is actually running.

mod error;
mod file;
mod memory;

pub use error::StateError;
pub use file::FileDesiredState;
pub use memory::MemoryDesiredState;

/// Source of truth for which ports should be forwarding.
pub trait DesiredState: Send + Sync {
    /// Remote host every forward relays to, if configured
    fn remote_target(&self) -> Option<String>;

    /// Desired local ports, in insertion order and without duplicates
    fn desired_ports(&self) -> Vec<u16>;

    /// Add a port; adding an existing port is a no-op
    fn add_port(&self, port: u16) -> Result<(), StateError>;

    /// Remove a port; removing an absent port is a no-op
    fn remove_port(&self, port: u16) -> Result<(), StateError>;

    /// Remote port for a local port (same port unless remapped)
    fn remote_port(&self, local: u16) -> u16 {
        local
    }
}
