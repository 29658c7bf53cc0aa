// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Fixed-depth pooling of raw memory blocks.
//!
//! The pool is intentionally simple:
//! - bounded free list (`depth` blocks at most are retained)
//! - [`Umem`] returns its backing block to the pool on drop
//! - an optional outstanding-block limit turns exhaustion into
//!   [`Error::OutOfMemory`] instead of unbounded growth
//!
//! Buffer managers draw their backing storage from here to amortize
//! allocations on the record hot path.

use crate::error::{Error, Result};
use bytes::BytesMut;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    /// Blocks currently sitting in the free list.
    pub available: usize,
    /// Blocks handed out and not yet returned.
    pub outstanding: usize,
}

struct PoolInner {
    depth: usize,
    limit: Option<usize>,
    free: Vec<BytesMut>,
    outstanding: usize,
    hits: u64,
    misses: u64,
}

/// A recycling allocator for raw byte blocks.
///
/// Cloning the pool is cheap and yields a handle to the same free list. The
/// pool is single-threaded, like everything else driven from the loop thread.
#[derive(Clone)]
pub struct UmemPool {
    inner: Rc<RefCell<PoolInner>>,
}

impl UmemPool {
    /// Creates a pool retaining at most `depth` returned blocks.
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                depth,
                limit: None,
                free: Vec::with_capacity(depth),
                outstanding: 0,
                hits: 0,
                misses: 0,
            })),
        }
    }

    /// Creates a pool that additionally refuses to hand out more than
    /// `limit` blocks at a time.
    ///
    /// With a limit set, exhaustion surfaces as [`Error::OutOfMemory`] so
    /// that allocation-failure paths can be exercised deterministically.
    pub fn with_limit(depth: usize, limit: usize) -> Self {
        let pool = Self::new(depth);
        pool.inner.borrow_mut().limit = Some(limit);
        pool
    }

    /// Obtains a zero-initialized block of exactly `size` bytes.
    ///
    /// Reuses a free block with enough capacity when one is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the outstanding-block limit is
    /// reached.
    pub fn alloc(&self, size: usize) -> Result<Umem> {
        let mut inner = self.inner.borrow_mut();
        if let Some(limit) = inner.limit {
            if inner.outstanding >= limit {
                return Err(Error::OutOfMemory);
            }
        }

        let reuse = inner.free.iter().position(|block| block.capacity() >= size);
        let mut data = match reuse {
            Some(idx) => {
                inner.hits += 1;
                inner.free.swap_remove(idx)
            },
            None => {
                inner.misses += 1;
                BytesMut::with_capacity(size)
            },
        };
        data.clear();
        data.resize(size, 0);
        inner.outstanding += 1;

        Ok(Umem { data, pool: Rc::downgrade(&self.inner) })
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.borrow();
        PoolStats {
            hits: inner.hits,
            misses: inner.misses,
            available: inner.free.len(),
            outstanding: inner.outstanding,
        }
    }
}

/// A pooled block of bytes.
///
/// Dereferences to [`BytesMut`]; the logical length is whatever the owner
/// resizes it to, up to the block capacity. Dropping the block hands it back
/// to its pool if the free list has room.
pub struct Umem {
    data: BytesMut,
    pool: Weak<RefCell<PoolInner>>,
}

impl std::fmt::Debug for Umem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Umem")
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish_non_exhaustive()
    }
}

impl Deref for Umem {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Umem {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        let Some(inner) = self.pool.upgrade() else { return };
        let mut inner = inner.borrow_mut();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        if inner.free.len() < inner.depth {
            inner.free.push(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn returns_to_pool_on_drop() {
        let pool = UmemPool::new(1);
        {
            let mut block = pool.alloc(16).unwrap();
            block[0] = 7;
            assert_eq!(block.len(), 16);
            assert_eq!(pool.stats().outstanding, 1);
        }
        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.outstanding, 0);

        // The next allocation of a fitting size is a hit and comes zeroed.
        let block = pool.alloc(8).unwrap();
        assert_eq!(pool.stats().hits, 1);
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn depth_bounds_the_free_list() {
        let pool = UmemPool::new(1);
        let a = pool.alloc(4).unwrap();
        let b = pool.alloc(4).unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().available, 1);
    }

    #[test]
    fn limit_refuses_allocation() {
        let pool = UmemPool::with_limit(4, 2);
        let _a = pool.alloc(4).unwrap();
        let _b = pool.alloc(4).unwrap();
        assert!(matches!(pool.alloc(4), Err(Error::OutOfMemory)));
        drop(_a);
        assert!(pool.alloc(4).is_ok());
    }
}
