//! Error types for desired-state persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or saving desired state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the state file failed.
    #[error("State file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid TOML for the expected schema.
    #[error("Failed to parse state file: {0}")]
    Decode(#[from] toml::de::Error),

    /// The state could not be encoded.
    #[error("Failed to encode state: {0}")]
    Encode(#[from] toml::ser::Error),
}
