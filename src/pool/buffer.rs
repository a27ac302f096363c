//! Relay buffer pool
//!
//! Pre-allocated fixed-size buffers shared by every relay loop, so
//! accepting a session does not allocate two fresh 64 KiB chunks.

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A buffer checked out of the pool; returned on drop
pub struct RelayBuffer {
    data: Box<[u8]>,
    pool: Arc<PoolInner>,
}

impl RelayBuffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Deref for RelayBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for RelayBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for RelayBuffer {
    fn drop(&mut self) {
        let data = std::mem::replace(&mut self.data, Box::new([]));
        self.pool.release(data);
    }
}

struct PoolInner {
    buffers: ArrayQueue<Box<[u8]>>,
    buffer_size: usize,
    in_use: AtomicUsize,
    misses: AtomicUsize,
}

impl PoolInner {
    fn release(&self, data: Box<[u8]>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        // Overflow buffers allocated on a miss are simply freed
        let _ = self.buffers.push(data);
    }
}

/// Lock-free pool of equally sized relay buffers
#[derive(Clone)]
pub struct RelayBufferPool {
    inner: Arc<PoolInner>,
}

impl RelayBufferPool {
    /// Pre-allocate `count` buffers of `buffer_size` bytes
    pub fn new(count: usize, buffer_size: usize) -> Self {
        // ArrayQueue rejects a zero capacity
        let buffers = ArrayQueue::new(count.max(1));
        for _ in 0..count {
            let _ = buffers.push(vec![0u8; buffer_size].into_boxed_slice());
        }

        Self {
            inner: Arc::new(PoolInner {
                buffers,
                buffer_size,
                in_use: AtomicUsize::new(0),
                misses: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a pooled buffer, allocating a new one if the pool is exhausted
    pub fn acquire(&self) -> RelayBuffer {
        let data = self.inner.buffers.pop().unwrap_or_else(|| {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.inner.buffer_size].into_boxed_slice()
        });
        self.inner.in_use.fetch_add(1, Ordering::Relaxed);

        RelayBuffer {
            data,
            pool: self.inner.clone(),
        }
    }

    pub fn stats(&self) -> RelayBufferPoolStats {
        RelayBufferPoolStats {
            available: self.inner.buffers.len(),
            in_use: self.inner.in_use.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }
}

/// Buffer pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayBufferPoolStats {
    pub available: usize,
    pub in_use: usize,
    pub misses: usize,
}
