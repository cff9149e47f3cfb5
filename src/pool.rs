//! Process-wide pool of scratch buffers for response bodies.
//!
//! Long polling reads a potentially large body on every attempt; reusing the
//! same handful of buffers keeps the steady-state allocation count at zero.
//! Buffers are cleared on return, and any buffer grown past [`RETAIN_LIMIT`]
//! is dropped instead of parked so one pathological body cannot pin memory.

use once_cell::sync::Lazy;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Initial capacity of every pooled buffer.
const BUF_CAPACITY: usize = 256 * 1024;

/// Buffers grown past this are not returned to the pool.
const RETAIN_LIMIT: usize = 4 * BUF_CAPACITY;

/// Parked buffers beyond this count are dropped.
const POOL_LIMIT: usize = 8;

static POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// A pooled scratch buffer, returned to the pool on drop.
pub(crate) struct ScratchBuf {
    buf: Vec<u8>,
}

impl ScratchBuf {
    /// Borrow an empty buffer from the pool, allocating one if it is dry.
    pub(crate) fn get() -> Self {
        let buf = POOL
            .lock()
            .map(|mut pool| pool.pop())
            .unwrap_or_default()
            .unwrap_or_else(|| Vec::with_capacity(BUF_CAPACITY));
        ScratchBuf { buf }
    }
}

impl Deref for ScratchBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for ScratchBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for ScratchBuf {
    fn drop(&mut self) {
        if self.buf.capacity() > RETAIN_LIMIT {
            return;
        }
        self.buf.clear();
        if let Ok(mut pool) = POOL.lock() {
            if pool.len() < POOL_LIMIT {
                pool.push(std::mem::take(&mut self.buf));
            }
        }
    }
}
