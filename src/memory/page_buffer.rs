//! # Scratch Page Pool
//!
//! Reusable page-sized scratch buffers for page maintenance.
//!
//! ## Purpose
//!
//! Defragmentation, recompression, root growth and height collapse all copy
//! a full page aside before rewriting it in place. This pool hands out
//! page-sized buffers so those paths do not allocate a fresh 8KB block on
//! every call.
//!
//! ## Usage
//!
//! ```ignore
//! let pool = ScratchPagePool::new(4);
//!
//! let mut scratch = pool.acquire();
//! scratch.copy_from_page(page_data);
//!
//! // Buffer returns to the pool when the guard is dropped, on every path
//! drop(scratch);
//! ```
//!
//! ## Design
//!
//! A single `parking_lot::Mutex` guards the free list: a tree handle is
//! single-writer, so contention only appears when several handles share one
//! store. The pool is bounded; buffers returned to a full pool are freed.
//!
//! `ScratchPage` uses `ManuallyDrop` instead of `Option` so a guard can never
//! be observed without its buffer.

use crate::config::PAGE_SIZE;
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

type PageBuffer = Box<[u8; PAGE_SIZE]>;

/// A bounded pool of reusable page-sized buffers.
pub struct ScratchPagePool {
    inner: Arc<ScratchPagePoolInner>,
}

struct ScratchPagePoolInner {
    free: Mutex<Vec<PageBuffer>>,
    capacity: usize,
}

impl ScratchPagePool {
    /// Creates a pool holding up to `capacity` idle buffers, all
    /// pre-allocated.
    pub fn new(capacity: usize) -> Self {
        let free: Vec<PageBuffer> = (0..capacity).map(|_| Box::new([0u8; PAGE_SIZE])).collect();
        Self {
            inner: Arc::new(ScratchPagePoolInner {
                free: Mutex::new(free),
                capacity,
            }),
        }
    }

    /// Takes a buffer from the pool, allocating when the pool is empty.
    ///
    /// The contents of a reused buffer are unspecified.
    pub fn acquire(&self) -> ScratchPage {
        let buffer = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Box::new([0u8; PAGE_SIZE]));

        ScratchPage {
            buffer: ManuallyDrop::new(buffer),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }
}

impl Clone for ScratchPagePool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for ScratchPagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchPagePool")
            .field("available", &self.available())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// A scratch page that returns to its pool when dropped.
pub struct ScratchPage {
    /// Always valid until Drop.
    buffer: ManuallyDrop<PageBuffer>,
    pool: Arc<ScratchPagePoolInner>,
}

impl ScratchPage {
    /// Copies a full page into the buffer.
    pub fn copy_from_page(&mut self, page: &[u8]) {
        let len = page.len().min(PAGE_SIZE);
        self.buffer[..len].copy_from_slice(&page[..len]);
        self.buffer[len..].fill(0);
    }
}

impl std::fmt::Debug for ScratchPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchPage").finish_non_exhaustive()
    }
}

impl Deref for ScratchPage {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buffer[..]
    }
}

impl DerefMut for ScratchPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer[..]
    }
}

impl Drop for ScratchPage {
    fn drop(&mut self) {
        // SAFETY: drop runs once and nothing touches self.buffer afterwards.
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        let mut free = self.pool.free.lock();
        if free.len() < self.pool.capacity {
            free.push(buffer);
        }
    }
}
