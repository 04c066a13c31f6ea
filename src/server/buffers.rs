//! Free list of encode buffers.
//!
//! Responses are encoded into buffers drawn from here and handed back after
//! the frame is written. Buffers are cleared on release, so nothing written
//! for one response is visible to the next.

use std::sync::{Mutex, PoisonError};

/// Initial capacity of a freshly allocated buffer.
const INITIAL_CAPACITY: usize = 512;

/// Buffers that grew past this are dropped instead of kept.
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

/// Bounded pool of reusable `Vec<u8>` buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
}

impl BufferPool {
    pub fn new(max_buffers: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
        }
    }

    /// Take an empty buffer, reusing a released one when available.
    pub fn acquire(&self) -> Vec<u8> {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY))
    }

    /// Return a buffer to the pool.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_buffers {
            free.push(buf);
        }
    }

    /// Buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
