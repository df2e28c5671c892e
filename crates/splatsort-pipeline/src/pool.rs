//! Capacity-keyed buffer pool
//!
//! Sort jobs need an output buffer sized to the element count every time
//! they run; allocating one per job would put a large allocation on the
//! hot path several times a second. The pool keeps released buffers on a
//! free list and hands back the first one whose capacity fits.

use crate::error::PoolError;
use parking_lot::Mutex;
use splatsort_core::SortScratch;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Idle buffers retained per pool; extras are dropped on release.
const MAX_IDLE: usize = 4;

/// Reusable `Vec<T>` pool keyed by capacity.
///
/// `acquire` never blocks beyond the internal lock and fails cleanly if
/// the allocator cannot satisfy the request. Buffers come back empty.
pub struct BufferPool<T> {
    free: Mutex<Vec<Vec<T>>>,
    outstanding: AtomicUsize,
}

impl<T> BufferPool<T> {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Acquire a cleared buffer with capacity for at least
    /// `min_capacity` elements, reusing a pooled one when possible.
    pub fn acquire(&self, min_capacity: usize) -> Result<Vec<T>, PoolError> {
        let mut buf = {
            let mut free = self.free.lock();
            match free.iter().position(|b| b.capacity() >= min_capacity) {
                Some(i) => free.swap_remove(i),
                // Grow the most recently released buffer rather than
                // allocating from nothing
                None => free.pop().unwrap_or_default(),
            }
        };

        if buf.capacity() < min_capacity {
            if let Err(source) = buf.try_reserve(min_capacity) {
                // Growth failed; don't lose the buffer we took
                self.store_idle(buf);
                return Err(PoolError::Allocation {
                    capacity: min_capacity,
                    source,
                });
            }
        }

        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(buf)
    }

    /// Return a buffer for reuse. Releasing more buffers than were
    /// acquired is a contract violation: logged and dropped, never
    /// poisoning the pool.
    pub fn release(&self, mut buf: Vec<T>) {
        let prev = self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if prev == 0 {
            self.outstanding.store(0, Ordering::Relaxed);
            tracing::warn!("released a buffer that was not acquired from this pool");
            return;
        }
        buf.clear();
        self.store_idle(buf);
    }

    fn store_idle(&self, buf: Vec<T>) {
        let mut free = self.free.lock();
        if free.len() < MAX_IDLE {
            free.push(buf);
        }
        // Over the cap the buffer drops here and its memory is returned
    }

    /// Buffers currently leased out
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Idle buffers available for reuse
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}

impl<T> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of sort scratch sets, one leased per in-flight job.
pub(crate) struct ScratchPool {
    free: Mutex<Vec<SortScratch>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> SortScratch {
        self.free.lock().pop().unwrap_or_default()
    }

    pub fn release(&self, scratch: SortScratch) {
        let mut free = self.free.lock();
        if free.len() < MAX_IDLE {
            free.push(scratch);
        }
    }
}
