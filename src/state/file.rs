//! TOML-file backed desired state

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{DesiredState, StateError};

/// On-disk layout of the state file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StateFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_host: Option<String>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    remap: Vec<PortRemap>,
}

/// Local port relayed to a different remote port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PortRemap {
    local: u16,
    remote: u16,
}

/// Desired state persisted as a TOML file.
///
/// The whole file is rewritten after every mutation.
pub struct FileDesiredState {
    path: PathBuf,
    state: Mutex<StateFile>,
}

impl FileDesiredState {
    /// Open the state file, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(source) => return Err(StateError::Io { path, source }),
        };

        debug!(path = ?path, ports = state.ports.len(), "Desired state loaded");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set or clear the remote host
    pub fn set_remote_target(&self, host: Option<String>) -> Result<(), StateError> {
        self.update(|state| {
            let host = host.filter(|h| !h.trim().is_empty());
            let changed = state.remote_host != host;
            state.remote_host = host;
            changed
        })
    }

    /// Relay `local` to `remote` instead of the same port number
    pub fn set_remote_port(&self, local: u16, remote: u16) -> Result<(), StateError> {
        self.update(|state| {
            state.remap.retain(|r| r.local != local);
            if remote != local {
                state.remap.push(PortRemap { local, remote });
            }
            true
        })
    }

    /// Apply `f` and persist when it reports a change
    fn update(&self, f: impl FnOnce(&mut StateFile) -> bool) -> Result<(), StateError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        if !f(&mut next) {
            return Ok(());
        }
        self.save(&next)?;
        *state = next;
        Ok(())
    }

    fn save(&self, state: &StateFile) -> Result<(), StateError> {
        let contents = toml::to_string_pretty(state)?;
        let io_err = |source: std::io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = ?self.path, ports = state.ports.len(), "Desired state saved");
        Ok(())
    }
}

impl DesiredState for FileDesiredState {
    fn remote_target(&self) -> Option<String> {
        self.state.lock().remote_host.clone()
    }

    fn desired_ports(&self) -> Vec<u16> {
        self.state.lock().ports.clone()
    }

    fn add_port(&self, port: u16) -> Result<(), StateError> {
        self.update(|state| {
            if state.ports.contains(&port) {
                return false;
            }
            state.ports.push(port);
            true
        })
    }

    fn remove_port(&self, port: u16) -> Result<(), StateError> {
        self.update(|state| {
            let before = state.ports.len();
            state.ports.retain(|p| *p != port);
            state.ports.len() != before
        })
    }

    fn remote_port(&self, local: u16) -> u16 {
        self.state
            .lock()
            .remap
            .iter()
            .find(|r| r.local == local)
            .map_or(local, |r| r.remote)
    }
}
