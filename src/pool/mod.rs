//! Memory pool management
//!
//! Pre-allocated relay buffers for the copy-loop hot path.

mod buffer;

pub use buffer::{RelayBuffer, RelayBufferPool, RelayBufferPoolStats};
