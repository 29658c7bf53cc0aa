// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Sound buffers: named per-channel planes of fixed-size samples.

use crate::error::{Error, Result};
use crate::mem::{Umem, UmemPool};
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// Construction-time layout of a sound buffer manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundLayout {
    /// Bytes per sample, e.g. 4 for f32.
    pub sample_size: usize,
    /// Channel plane names, e.g. `["l", "r"]` or `["lr"]` for interleaved.
    pub channels: Vec<String>,
}

/// Factory for [`UbufSound`] buffers.
pub struct SoundMgr {
    umem: UmemPool,
    layout: SoundLayout,
}

impl SoundMgr {
    pub fn new(umem: UmemPool, layout: SoundLayout) -> Rc<Self> {
        Rc::new(Self { umem, layout })
    }

    /// Allocates storage for `samples` samples on every channel plane.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] when the pool refuses.
    pub fn alloc(self: &Rc<Self>, samples: usize) -> Result<UbufSound> {
        let plane_len = samples * self.layout.sample_size;
        let data = self.umem.alloc(plane_len * self.layout.channels.len())?;
        Ok(UbufSound {
            mgr: Rc::clone(self),
            storage: Rc::new(RefCell::new(data)),
            samples,
        })
    }
}

/// A view onto shared sound storage.
pub struct UbufSound {
    mgr: Rc<SoundMgr>,
    storage: Rc<RefCell<Umem>>,
    samples: usize,
}

impl std::fmt::Debug for UbufSound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufSound")
            .field("samples", &self.samples)
            .field("shared", &!self.is_unique())
            .finish_non_exhaustive()
    }
}

impl UbufSound {
    pub const fn samples(&self) -> usize {
        self.samples
    }

    pub fn sample_size(&self) -> usize {
        self.mgr.layout.sample_size
    }

    /// O(1) duplication sharing the storage.
    pub fn dup(&self) -> Self {
        Self {
            mgr: Rc::clone(&self.mgr),
            storage: Rc::clone(&self.storage),
            samples: self.samples,
        }
    }

    pub fn is_unique(&self) -> bool {
        Rc::strong_count(&self.storage) == 1
    }

    /// Maps the named channel plane for reading.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] for an unknown channel, [`Error::Busy`] while a
    /// writer is mapped.
    pub fn plane_read(&self, channel: &str) -> Result<ChannelReadGuard<'_>> {
        let (off, len) = self.plane_span(channel)?;
        let guard = self.storage.try_borrow().map_err(|_| Error::Busy)?;
        Ok(ChannelReadGuard { guard, off, len })
    }

    /// Maps the named channel plane for writing, cloning shared storage
    /// first.
    ///
    /// # Errors
    ///
    /// As [`plane_read`](Self::plane_read), plus [`Error::OutOfMemory`] if
    /// the copy-on-write allocation fails.
    pub fn plane_write(&mut self, channel: &str) -> Result<ChannelWriteGuard<'_>> {
        self.make_unique()?;
        let (off, len) = self.plane_span(channel)?;
        let guard = self.storage.try_borrow_mut().map_err(|_| Error::Busy)?;
        Ok(ChannelWriteGuard { guard, off, len })
    }

    /// Iterates the channel plane names.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.mgr.layout.channels.iter().map(String::as_str)
    }

    fn plane_span(&self, channel: &str) -> Result<(usize, usize)> {
        let idx = self
            .mgr
            .layout
            .channels
            .iter()
            .position(|c| c == channel)
            .ok_or_else(|| Error::invalid(format!("unknown channel {channel}")))?;
        let plane_len = self.samples * self.mgr.layout.sample_size;
        Ok((idx * plane_len, plane_len))
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
}

/// Read guard over one channel plane. Dropping it is the unmap.
pub struct ChannelReadGuard<'a> {
    guard: Ref<'a, Umem>,
    off: usize,
    len: usize,
}

impl Deref for ChannelReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard[self.off..self.off + self.len]
    }
}

/// Write guard over one channel plane. Dropping it is the unmap.
pub struct ChannelWriteGuard<'a> {
    guard: RefMut<'a, Umem>,
    off: usize,
    len: usize,
}

impl Deref for ChannelWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard[self.off..self.off + self.len]
    }
}

impl DerefMut for ChannelWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard[self.off..self.off + self.len]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mgr() -> Rc<SoundMgr> {
        SoundMgr::new(
            UmemPool::new(2),
            SoundLayout { sample_size: 2, channels: vec!["l".into(), "r".into()] },
        )
    }

    #[test]
    fn planes_are_disjoint() {
        let mgr = mgr();
        let mut snd = mgr.alloc(4).unwrap();
        snd.plane_write("l").unwrap().fill(0xaa);
        snd.plane_write("r").unwrap().fill(0xbb);
        assert!(snd.plane_read("l").unwrap().iter().all(|&x| x == 0xaa));
        assert!(snd.plane_read("r").unwrap().iter().all(|&x| x == 0xbb));
        assert!(snd.plane_read("c").is_err());
    }

    #[test]
    fn write_is_cow() {
        let mgr = mgr();
        let mut a = mgr.alloc(4).unwrap();
        let b = a.dup();
        a.plane_write("l").unwrap().fill(1);
        assert!(b.plane_read("l").unwrap().iter().all(|&x| x == 0));
        assert!(a.plane_read("l").unwrap().iter().all(|&x| x == 1));
    }
}
