// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Block buffers: one contiguous byte range with prepend/append headroom.

use crate::error::{Error, Result};
use crate::mem::{Umem, UmemPool};
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// Construction-time layout of a block buffer manager.
///
/// `prepend` and `append` reserve headroom around the requested payload so
/// that encapsulators can grow the view in place; `align` rounds the payload
/// start up so mapped pointers satisfy SIMD-friendly alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLayout {
    pub prepend: usize,
    pub append: usize,
    pub align: usize,
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self { prepend: 0, append: 0, align: 1 }
    }
}

/// Factory for [`UbufBlock`] buffers.
pub struct BlockMgr {
    umem: UmemPool,
    layout: BlockLayout,
}

impl BlockMgr {
    pub fn new(umem: UmemPool, layout: BlockLayout) -> Rc<Self> {
        Rc::new(Self { umem, layout })
    }

    /// Allocates a block buffer of `size` payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] when the memory pool refuses.
    pub fn alloc(self: &Rc<Self>, size: usize) -> Result<UbufBlock> {
        let align = self.layout.align.max(1);
        let prepend = self.layout.prepend.div_ceil(align) * align;
        let total = prepend + size + self.layout.append;
        let data = self.umem.alloc(total)?;
        Ok(UbufBlock {
            mgr: Rc::clone(self),
            storage: Rc::new(RefCell::new(data)),
            offset: prepend,
            size,
        })
    }

    /// Builds a block buffer directly from bytes, a convenience for sources
    /// and tests.
    pub fn alloc_from(self: &Rc<Self>, bytes: &[u8]) -> Result<UbufBlock> {
        let mut ubuf = self.alloc(bytes.len())?;
        ubuf.write_map(0, None)?.copy_from_slice(bytes);
        Ok(ubuf)
    }
}

/// A view into shared block storage.
///
/// The share count is the `Rc` strong count on the storage; [`dup`] bumps
/// it without copying bytes. Write access clones the storage first whenever
/// the count exceeds one.
///
/// [`dup`]: UbufBlock::dup
pub struct UbufBlock {
    mgr: Rc<BlockMgr>,
    storage: Rc<RefCell<Umem>>,
    offset: usize,
    size: usize,
}

impl std::fmt::Debug for UbufBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufBlock")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("shared", &!self.is_unique())
            .finish_non_exhaustive()
    }
}

impl UbufBlock {
    /// Payload bytes visible through this view.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// O(1) duplication: same storage, same view, share count + 1.
    pub fn dup(&self) -> Self {
        Self {
            mgr: Rc::clone(&self.mgr),
            storage: Rc::clone(&self.storage),
            offset: self.offset,
            size: self.size,
        }
    }

    /// True when this view is the only one on its storage.
    pub fn is_unique(&self) -> bool {
        Rc::strong_count(&self.storage) == 1
    }

    /// Maps `size` bytes at `offset` for reading. `None` maps through to the
    /// end of the view.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] when the range exceeds the view; [`Error::Busy`]
    /// while a writer is mapped on the same storage.
    pub fn read_map(&self, offset: usize, size: Option<usize>) -> Result<BlockReadGuard<'_>> {
        let (off, len) = self.span(offset, size)?;
        let guard = self.storage.try_borrow().map_err(|_| Error::Busy)?;
        Ok(BlockReadGuard { guard, off: self.offset + off, len })
    }

    /// Maps `size` bytes at `offset` for writing, cloning shared storage
    /// first (copy-on-write).
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] on a bad range, [`Error::Busy`] while any other
    /// map is live, [`Error::OutOfMemory`] if the copy cannot be allocated.
    pub fn write_map(&mut self, offset: usize, size: Option<usize>) -> Result<BlockWriteGuard<'_>> {
        self.make_unique()?;
        let (off, len) = self.span(offset, size)?;
        let guard = self.storage.try_borrow_mut().map_err(|_| Error::Busy)?;
        Ok(BlockWriteGuard { guard, off: self.offset + off, len })
    }

    /// Adjusts the view: skips `skip` bytes from the current start (negative
    /// recovers prepend headroom) and sets the new size, `None` keeping the
    /// current end.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] when the new view would leave the underlying
    /// storage.
    pub fn resize(&mut self, skip: i64, new_size: Option<usize>) -> Result<()> {
        let storage_len = self.storage.borrow().len() as i64;
        let new_offset = self.offset as i64 + skip;
        let new_size = match new_size {
            Some(s) => s as i64,
            None => self.size as i64 - skip,
        };
        if new_offset < 0 || new_size < 0 || new_offset + new_size > storage_len {
            return Err(Error::invalid(format!(
                "resize to [{new_offset}, +{new_size}] leaves storage of {storage_len} bytes"
            )));
        }
        #[allow(clippy::cast_sign_loss)]
        {
            self.offset = new_offset as usize;
            self.size = new_size as usize;
        }
        Ok(())
    }

    /// Logically concatenates `other` after this view.
    ///
    /// Extends in place when this view uniquely owns its storage and ends
    /// flush with it; otherwise copies both payloads into a new backing.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] when a new backing cannot be allocated,
    /// [`Error::Busy`] when either storage is mapped.
    pub fn append(&mut self, other: &Self) -> Result<()> {
        let mut tail = vec![0; other.size()];
        other.extract(0, &mut tail)?;

        let in_place = self.is_unique() && {
            let storage = self.storage.try_borrow().map_err(|_| Error::Busy)?;
            self.offset + self.size == storage.len()
        };
        if in_place {
            let mut storage = self.storage.try_borrow_mut().map_err(|_| Error::Busy)?;
            storage.extend_from_slice(&tail);
        } else {
            let combined = self.size + tail.len();
            let mut fresh = self.mgr.umem.alloc(combined)?;
            {
                let storage = self.storage.try_borrow().map_err(|_| Error::Busy)?;
                fresh[..self.size].copy_from_slice(&storage[self.offset..self.offset + self.size]);
            }
            fresh[self.size..].copy_from_slice(&tail);
            self.storage = Rc::new(RefCell::new(fresh));
            self.offset = 0;
        }
        self.size += tail.len();
        Ok(())
    }

    /// Copies `out.len()` bytes starting at `offset` out of the view.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] on a bad range, [`Error::Busy`] while a writer is
    /// mapped.
    pub fn extract(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let map = self.read_map(offset, Some(out.len()))?;
        out.copy_from_slice(&map);
        Ok(())
    }

    fn make_unique(&mut self) -> Result<()> {
        if self.is_unique() {
            return Ok(());
        }
        let fresh = {
            let current = self.storage.try_borrow().map_err(|_| Error::Busy)?;
            let mut fresh = self.mgr.umem.alloc(current.len())?;
            fresh[..].copy_from_slice(&current[..]);
            fresh
        };
        self.storage = Rc::new(RefCell::new(fresh));
        Ok(())
    }

    fn span(&self, offset: usize, size: Option<usize>) -> Result<(usize, usize)> {
        let len = match size {
            Some(s) => s,
            None => self.size.checked_sub(offset).ok_or_else(|| {
                Error::invalid(format!("offset {offset} beyond view of {} bytes", self.size))
            })?,
        };
        if offset + len > self.size {
            return Err(Error::invalid(format!(
                "range [{offset}, +{len}] beyond view of {} bytes",
                self.size
            )));
        }
        Ok((offset, len))
    }
}

/// Read guard; dereferences to the mapped bytes. Dropping it is the unmap.
pub struct BlockReadGuard<'a> {
    guard: Ref<'a, Umem>,
    off: usize,
    len: usize,
}

impl Deref for BlockReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard[self.off..self.off + self.len]
    }
}

/// Write guard; dereferences to the mapped bytes. Dropping it is the unmap.
pub struct BlockWriteGuard<'a> {
    guard: RefMut<'a, Umem>,
    off: usize,
    len: usize,
}

impl Deref for BlockWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard[self.off..self.off + self.len]
    }
}

impl DerefMut for BlockWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard[self.off..self.off + self.len]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mgr() -> Rc<BlockMgr> {
        BlockMgr::new(UmemPool::new(2), BlockLayout::default())
    }

    #[test]
    fn alloc_and_map() {
        let mgr = mgr();
        let mut ubuf = mgr.alloc(8).unwrap();
        assert_eq!(ubuf.size(), 8);
        ubuf.write_map(0, None).unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&*ubuf.read_map(2, Some(3)).unwrap(), &[3, 4, 5]);
    }

    #[test]
    fn copy_on_write_leaves_duplicates_untouched() {
        let mgr = mgr();
        let mut a = mgr.alloc_from(&[0x01; 64]).unwrap();
        let b = a.dup();
        assert!(!a.is_unique());

        a.write_map(0, None).unwrap().fill(0x02);
        assert!(a.is_unique());
        assert!(b.is_unique());
        assert!(a.read_map(0, None).unwrap().iter().all(|&x| x == 0x02));
        assert!(b.read_map(0, None).unwrap().iter().all(|&x| x == 0x01));
    }

    #[test]
    fn resize_recovers_prepend_and_refuses_growth() {
        let mgr = BlockMgr::new(UmemPool::new(2), BlockLayout { prepend: 4, append: 2, align: 4 });
        let mut ubuf = mgr.alloc(6).unwrap();
        // Skip two payload bytes.
        ubuf.resize(2, None).unwrap();
        assert_eq!(ubuf.size(), 4);
        // Recover them plus the prepend headroom.
        ubuf.resize(-6, None).unwrap();
        assert_eq!(ubuf.size(), 10);
        // Growing past the append headroom fails.
        assert!(ubuf.resize(0, Some(13)).is_err());
        assert_eq!(ubuf.size(), 10);
    }

    #[test]
    fn append_concatenates() {
        let mgr = mgr();
        let mut head = mgr.alloc_from(&[1, 2, 3]).unwrap();
        let tail = mgr.alloc_from(&[4, 5]).unwrap();
        head.append(&tail).unwrap();
        assert_eq!(head.size(), 5);
        assert_eq!(&*head.read_map(0, None).unwrap(), &[1, 2, 3, 4, 5]);
        // The appended source is untouched.
        assert_eq!(&*tail.read_map(0, None).unwrap(), &[4, 5]);
    }

    #[test]
    fn append_to_shared_view_reallocates() {
        let mgr = mgr();
        let mut head = mgr.alloc_from(&[1, 2]).unwrap();
        let shared = head.dup();
        let tail = mgr.alloc_from(&[3]).unwrap();
        head.append(&tail).unwrap();
        assert_eq!(&*head.read_map(0, None).unwrap(), &[1, 2, 3]);
        assert_eq!(&*shared.read_map(0, None).unwrap(), &[1, 2]);
    }

    #[test]
    fn read_maps_coexist_and_write_map_cows_away_from_them() {
        let mgr = mgr();
        let mut ubuf = mgr.alloc_from(&[9; 4]).unwrap();
        let mut dup = ubuf.dup();

        let r1 = ubuf.read_map(0, None).unwrap();
        let r2 = ubuf.read_map(1, Some(2)).unwrap();
        assert_eq!(r1.len(), 4);
        assert_eq!(r2.len(), 2);

        // Write-mapping the duplicate while readers are live lands on a
        // fresh backing, so the readers keep their bytes.
        let mut w = dup.write_map(0, None).unwrap();
        w.fill(1);
        drop(w);
        assert!(r1.iter().all(|&x| x == 9));
        assert!(dup.read_map(0, None).unwrap().iter().all(|&x| x == 1));
    }

    #[test]
    fn exhausted_pool_is_out_of_memory() {
        let mgr = BlockMgr::new(UmemPool::with_limit(1, 1), BlockLayout::default());
        let _held = mgr.alloc(4).unwrap();
        assert!(matches!(mgr.alloc(4), Err(Error::OutOfMemory)));
    }
}
