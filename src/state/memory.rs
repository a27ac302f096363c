//! In-process desired state

use parking_lot::RwLock;
use std::collections::HashMap;

use super::{DesiredState, StateError};

/// Desired state kept only in memory.
#[derive(Default)]
pub struct MemoryDesiredState {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    remote_host: Option<String>,
    ports: Vec<u16>,
    remap: HashMap<u16, u16>,
}

impl MemoryDesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a remote host already configured
    pub fn with_remote(host: impl Into<String>) -> Self {
        let state = Self::default();
        state.set_remote_target(Some(host.into()));
        state
    }

    pub fn set_remote_target(&self, host: Option<String>) {
        self.inner.write().remote_host = host;
    }

    pub fn set_remote_port(&self, local: u16, remote: u16) {
        self.inner.write().remap.insert(local, remote);
    }
}

impl DesiredState for MemoryDesiredState {
    fn remote_target(&self) -> Option<String> {
        self.inner.read().remote_host.clone()
    }

    fn desired_ports(&self) -> Vec<u16> {
        self.inner.read().ports.clone()
    }

    fn add_port(&self, port: u16) -> Result<(), StateError> {
        let mut inner = self.inner.write();
        if !inner.ports.contains(&port) {
            inner.ports.push(port);
        }
        Ok(())
    }

    fn remove_port(&self, port: u16) -> Result<(), StateError> {
        self.inner.write().ports.retain(|p| *p != port);
        Ok(())
    }

    fn remote_port(&self, local: u16) -> u16 {
        self.inner.read().remap.get(&local).copied().unwrap_or(local)
    }
}
