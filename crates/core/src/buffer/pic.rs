// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Picture buffers: named planes with chroma subsampling.
//!
//! The manager is configured with a plane list; every allocated picture
//! carves one backing block into per-plane regions. Plane names follow the
//! usual chroma conventions ("y8", "u8", "v8", "r8g8b8a8", ...).

use crate::error::{Error, Result};
use crate::mem::{Umem, UmemPool};
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// One plane of the picture layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneDesc {
    /// Chroma name, e.g. "y8" or "u8".
    pub chroma: String,
    /// Horizontal subsampling (2 halves the plane width).
    pub hsub: usize,
    /// Vertical subsampling.
    pub vsub: usize,
    /// Bytes per sample.
    pub sample_size: usize,
}

/// Construction-time layout of a picture buffer manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PicLayout {
    pub planes: Vec<PlaneDesc>,
}

impl PicLayout {
    /// Planar YUV 4:2:0, 8 bits per sample.
    pub fn yuv420p() -> Self {
        Self {
            planes: vec![
                PlaneDesc { chroma: "y8".into(), hsub: 1, vsub: 1, sample_size: 1 },
                PlaneDesc { chroma: "u8".into(), hsub: 2, vsub: 2, sample_size: 1 },
                PlaneDesc { chroma: "v8".into(), hsub: 2, vsub: 2, sample_size: 1 },
            ],
        }
    }
}

/// Resolved geometry of one plane inside an allocated picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub stride: usize,
    pub rows: usize,
    pub sample_size: usize,
}

#[derive(Debug, Clone)]
struct PlaneSlot {
    desc: PlaneDesc,
    offset: usize,
    geometry: PlaneGeometry,
}

/// Factory for [`UbufPic`] buffers.
pub struct PicMgr {
    umem: UmemPool,
    layout: PicLayout,
}

impl PicMgr {
    pub fn new(umem: UmemPool, layout: PicLayout) -> Rc<Self> {
        Rc::new(Self { umem, layout })
    }

    /// Allocates a picture of `hsize`×`vsize` pixels.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] when the dimensions do not divide evenly by every
    /// plane's subsampling; [`Error::OutOfMemory`] when the pool refuses.
    pub fn alloc(self: &Rc<Self>, hsize: usize, vsize: usize) -> Result<UbufPic> {
        let mut planes = Vec::with_capacity(self.layout.planes.len());
        let mut offset = 0;
        for desc in &self.layout.planes {
            if hsize % desc.hsub != 0 || vsize % desc.vsub != 0 {
                return Err(Error::invalid(format!(
                    "{hsize}x{vsize} does not divide by {}/{} subsampling of plane {}",
                    desc.hsub, desc.vsub, desc.chroma
                )));
            }
            let geometry = PlaneGeometry {
                stride: hsize / desc.hsub * desc.sample_size,
                rows: vsize / desc.vsub,
                sample_size: desc.sample_size,
            };
            planes.push(PlaneSlot { desc: desc.clone(), offset, geometry });
            offset += geometry.stride * geometry.rows;
        }
        let data = self.umem.alloc(offset)?;
        Ok(UbufPic {
            mgr: Rc::clone(self),
            storage: Rc::new(RefCell::new(data)),
            planes: Rc::from(planes),
            hsize,
            vsize,
        })
    }
}

/// A view onto shared picture storage.
pub struct UbufPic {
    mgr: Rc<PicMgr>,
    storage: Rc<RefCell<Umem>>,
    planes: Rc<[PlaneSlot]>,
    hsize: usize,
    vsize: usize,
}

impl std::fmt::Debug for UbufPic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufPic")
            .field("hsize", &self.hsize)
            .field("vsize", &self.vsize)
            .field("planes", &self.planes.len())
            .field("shared", &!self.is_unique())
            .finish_non_exhaustive()
    }
}

impl UbufPic {
    pub const fn hsize(&self) -> usize {
        self.hsize
    }

    pub const fn vsize(&self) -> usize {
        self.vsize
    }

    /// O(1) duplication sharing the storage.
    pub fn dup(&self) -> Self {
        Self {
            mgr: Rc::clone(&self.mgr),
            storage: Rc::clone(&self.storage),
            planes: Rc::clone(&self.planes),
            hsize: self.hsize,
            vsize: self.vsize,
        }
    }

    pub fn is_unique(&self) -> bool {
        Rc::strong_count(&self.storage) == 1
    }

    /// Geometry of the named plane.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] for a chroma not in the layout.
    pub fn plane_size(&self, chroma: &str) -> Result<PlaneGeometry> {
        Ok(self.slot(chroma)?.geometry)
    }

    /// Maps the named plane for reading.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] for an unknown chroma, [`Error::Busy`] while a
    /// writer is mapped.
    pub fn plane_read(&self, chroma: &str) -> Result<PlaneReadGuard<'_>> {
        let slot = self.slot(chroma)?;
        let guard = self.storage.try_borrow().map_err(|_| Error::Busy)?;
        Ok(PlaneReadGuard {
            guard,
            off: slot.offset,
            len: slot.geometry.stride * slot.geometry.rows,
        })
    }

    /// Maps the named plane for writing, cloning shared storage first.
    ///
    /// # Errors
    ///
    /// As [`plane_read`](Self::plane_read), plus [`Error::OutOfMemory`] if
    /// the copy-on-write allocation fails.
    pub fn plane_write(&mut self, chroma: &str) -> Result<PlaneWriteGuard<'_>> {
        self.make_unique()?;
        let slot = self.slot(chroma)?;
        let (off, len) = (slot.offset, slot.geometry.stride * slot.geometry.rows);
        let guard = self.storage.try_borrow_mut().map_err(|_| Error::Busy)?;
        Ok(PlaneWriteGuard { guard, off, len })
    }

    /// Iterates the chroma names of the layout.
    pub fn planes(&self) -> impl Iterator<Item = &str> {
        self.planes.iter().map(|slot| slot.desc.chroma.as_str())
    }

    fn slot(&self, chroma: &str) -> Result<&PlaneSlot> {
        self.planes
            .iter()
            .find(|slot| slot.desc.chroma == chroma)
            .ok_or_else(|| Error::invalid(format!("unknown chroma {chroma}")))
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

/// Read guard over one plane. Dropping it is the unmap.
pub struct PlaneReadGuard<'a> {
    guard: Ref<'a, Umem>,
    off: usize,
    len: usize,
}

impl Deref for PlaneReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard[self.off..self.off + self.len]
    }
}

/// Write guard over one plane. Dropping it is the unmap.
pub struct PlaneWriteGuard<'a> {
    guard: RefMut<'a, Umem>,
    off: usize,
    len: usize,
}

impl Deref for PlaneWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.guard[self.off..self.off + self.len]
    }
}

impl DerefMut for PlaneWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard[self.off..self.off + self.len]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn yuv420_geometry() {
        let mgr = PicMgr::new(UmemPool::new(2), PicLayout::yuv420p());
        let pic = mgr.alloc(16, 8).unwrap();
        assert_eq!(
            pic.plane_size("y8").unwrap(),
            PlaneGeometry { stride: 16, rows: 8, sample_size: 1 }
        );
        assert_eq!(
            pic.plane_size("u8").unwrap(),
            PlaneGeometry { stride: 8, rows: 4, sample_size: 1 }
        );
        assert!(pic.plane_size("a8").is_err());
    }

    #[test]
    fn odd_sizes_are_refused() {
        let mgr = PicMgr::new(UmemPool::new(2), PicLayout::yuv420p());
        assert!(matches!(mgr.alloc(15, 8), Err(Error::Invalid(_))));
    }

    #[test]
    fn plane_write_is_cow() {
        let mgr = PicMgr::new(UmemPool::new(2), PicLayout::yuv420p());
        let mut a = mgr.alloc(4, 4).unwrap();
        a.plane_write("y8").unwrap().fill(0x40);
        let b = a.dup();
        a.plane_write("y8").unwrap().fill(0x80);
        assert!(a.plane_read("y8").unwrap().iter().all(|&x| x == 0x80));
        assert!(b.plane_read("y8").unwrap().iter().all(|&x| x == 0x40));
    }
}
