// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Records — the unit that flows between stages.
//!
//! A [`Uref`] owns exactly one attribute dictionary and at most one buffer.
//! Ownership transfers on input: handing a record to a downstream stage
//! moves it, so "at most one strong holder in the data path" is enforced by
//! the compiler. A holder that wants to keep looking at a record must
//! [`dup`](Uref::dup) it, which shares the buffer and lazily shares the
//! dictionary.
//!
//! Time coordinates live inline on the record (see [`clock`]) because every
//! scheduling stage touches them; everything else is dictionary attributes.

pub mod clock;
pub mod flow;

pub use clock::{ClockBase, DateKind};

use crate::buffer::block::{BlockReadGuard, BlockWriteGuard, UbufBlock};
use crate::buffer::Ubuf;
use crate::dict::{Key, Namespace, Udict};
use crate::error::{Error, Result};
use clock::ClockDates;
use std::rc::Rc;

const BLOCK_START: Key = Key::new(Namespace::Block, "start");

/// The unit of flow: headers plus an optional payload.
#[derive(Debug, Default)]
pub struct Uref {
    dict: Rc<Udict>,
    ubuf: Option<Ubuf>,
    pub(crate) dates: ClockDates,
}

impl Uref {
    /// An empty record with no payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// A flow-definition record: attributes only, definition string set.
    pub fn flow_def(def: &str) -> Self {
        let mut uref = Self::new();
        uref.set_flow_def(def);
        uref
    }

    /// A data record around a payload.
    pub fn from_ubuf(ubuf: impl Into<Ubuf>) -> Self {
        Self { ubuf: Some(ubuf.into()), ..Self::default() }
    }

    /// Duplicates the record: shares the buffer, lazily shares the
    /// dictionary, copies the time coordinates.
    ///
    /// Every attribute getter observes the same values on the duplicate.
    pub fn dup(&self) -> Self {
        Self {
            dict: Rc::clone(&self.dict),
            ubuf: self.ubuf.as_ref().map(Ubuf::dup),
            dates: self.dates,
        }
    }

    pub const fn ubuf(&self) -> Option<&Ubuf> {
        self.ubuf.as_ref()
    }

    pub fn ubuf_mut(&mut self) -> Option<&mut Ubuf> {
        self.ubuf.as_mut()
    }

    /// Attaches a payload, returning the previous one if any.
    pub fn attach_ubuf(&mut self, ubuf: impl Into<Ubuf>) -> Option<Ubuf> {
        self.ubuf.replace(ubuf.into())
    }

    /// Detaches and returns the payload.
    pub fn detach_ubuf(&mut self) -> Option<Ubuf> {
        self.ubuf.take()
    }

    pub fn dict(&self) -> &Udict {
        &self.dict
    }

    /// Mutable dictionary access; clones the shared dictionary on first
    /// write after a duplication.
    pub fn dict_mut(&mut self) -> &mut Udict {
        Rc::make_mut(&mut self.dict)
    }

    // --- unit-start flag (block namespace) ---

    /// Marks this record as starting a new access unit (TS: a payload that
    /// carries a pointer_field).
    pub fn set_start(&mut self) {
        self.dict_mut().set_void(BLOCK_START);
    }

    pub fn has_start(&self) -> bool {
        self.dict.has_void(BLOCK_START)
    }

    pub fn clear_start(&mut self) {
        self.dict_mut().delete(BLOCK_START);
    }

    // --- block payload convenience ---

    /// Size of the block payload, or `None` when the record has no block
    /// buffer.
    pub fn block_size(&self) -> Option<usize> {
        Some(self.block().ok()?.size())
    }

    /// See [`UbufBlock::resize`].
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] without a block payload or on a bad range.
    pub fn block_resize(&mut self, skip: i64, new_size: Option<usize>) -> Result<()> {
        self.block_mut()?.resize(skip, new_size)
    }

    /// See [`UbufBlock::extract`].
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] without a block payload or on a bad range,
    /// [`Error::Busy`] while a writer is mapped.
    pub fn block_extract(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.block()?.extract(offset, out)
    }

    /// Appends another block buffer after this record's payload.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] without a block payload, [`Error::OutOfMemory`]
    /// when a combined backing cannot be allocated.
    pub fn block_append(&mut self, other: &UbufBlock) -> Result<()> {
        self.block_mut()?.append(other)
    }

    /// Read-maps a range of the block payload.
    ///
    /// # Errors
    ///
    /// As [`UbufBlock::read_map`], or [`Error::Invalid`] without a block
    /// payload.
    pub fn block_read(&self, offset: usize, size: Option<usize>) -> Result<BlockReadGuard<'_>> {
        self.block()?.read_map(offset, size)
    }

    /// Write-maps a range of the block payload (copy-on-write when shared).
    ///
    /// # Errors
    ///
    /// As [`UbufBlock::write_map`], or [`Error::Invalid`] without a block
    /// payload.
    pub fn block_write(
        &mut self,
        offset: usize,
        size: Option<usize>,
    ) -> Result<BlockWriteGuard<'_>> {
        self.block_mut()?.write_map(offset, size)
    }

    fn block(&self) -> Result<&UbufBlock> {
        self.ubuf
            .as_ref()
            .and_then(Ubuf::as_block)
            .ok_or_else(|| Error::invalid("record carries no block buffer"))
    }

    fn block_mut(&mut self) -> Result<&mut UbufBlock> {
        self.ubuf
            .as_mut()
            .and_then(Ubuf::as_block_mut)
            .ok_or_else(|| Error::invalid("record carries no block buffer"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::block::{BlockLayout, BlockMgr};
    use crate::mem::UmemPool;
    use crate::rational::Rational;

    fn block_mgr() -> Rc<BlockMgr> {
        BlockMgr::new(UmemPool::new(2), BlockLayout::default())
    }

    #[test]
    fn dup_preserves_every_getter() {
        let mgr = block_mgr();
        let mut uref = Uref::from_ubuf(mgr.alloc_from(&[1, 2, 3]).unwrap());
        uref.set_flow_def("block.mpegtspsi.");
        uref.set_start();
        uref.set_discontinuity();
        uref.set_pts(ClockBase::Prog, 1000);
        uref.set_rate(Rational::new(1, 2));
        uref.set_latency(27_000);

        let dup = uref.dup();
        assert_eq!(dup.def(), uref.def());
        assert_eq!(dup.has_start(), uref.has_start());
        assert_eq!(dup.has_discontinuity(), uref.has_discontinuity());
        assert_eq!(dup.pts(ClockBase::Prog), uref.pts(ClockBase::Prog));
        assert_eq!(dup.rate(), uref.rate());
        assert_eq!(dup.latency(), uref.latency());
        assert_eq!(dup.block_size(), uref.block_size());
    }

    #[test]
    fn dict_is_lazily_shared() {
        let mut a = Uref::flow_def("pic.");
        let b = a.dup();
        a.set_discontinuity();
        assert!(a.has_discontinuity());
        assert!(!b.has_discontinuity());
        assert_eq!(b.def().as_deref(), Some("pic."));
    }

    #[test]
    fn flow_def_records_have_no_payload() {
        let flow = Uref::flow_def("sound.");
        assert!(flow.is_flow_def());
        assert!(flow.ubuf().is_none());

        let mgr = block_mgr();
        let data = Uref::from_ubuf(mgr.alloc(4).unwrap());
        assert!(!data.is_flow_def());
    }

    #[test]
    fn block_ops_without_buffer_are_invalid() {
        let mut uref = Uref::new();
        assert!(uref.block_resize(0, Some(1)).is_err());
        assert!(uref.block_extract(0, &mut [0]).is_err());
        assert!(uref.block_size().is_none());
    }
}
