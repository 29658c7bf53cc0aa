// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Reference-counted media payloads.
//!
//! A buffer is a view (offset and size) into shared backing storage drawn
//! from a [`UmemPool`](crate::mem::UmemPool). Duplicating a buffer is O(1):
//! it clones the view and bumps the storage share count. Nothing observable
//! is writable while the share count exceeds one — write-mapping a shared
//! buffer clones the storage first (copy-on-write) and repoints the view.
//!
//! Three structural variants exist, each with its own manager:
//! - [`block`]: one contiguous byte range, the shape of demuxed streams
//! - [`pic`]: named planes with chroma subsampling
//! - [`sound`]: named per-channel planes of fixed-size samples
//!
//! Mapping returns RAII guards, so every map is unmapped on every exit path
//! by construction. A map that would conflict with a live writer fails with
//! [`Error::Busy`](crate::error::Error::Busy) instead of blocking.

pub mod block;
pub mod pic;
pub mod sound;

pub use block::{BlockLayout, BlockMgr, UbufBlock};
pub use pic::{PicLayout, PicMgr, PlaneDesc, PlaneGeometry, UbufPic};
pub use sound::{SoundLayout, SoundMgr, UbufSound};

use std::rc::Rc;

/// A media payload of any structural variant.
#[derive(Debug)]
pub enum Ubuf {
    Block(UbufBlock),
    Pic(UbufPic),
    Sound(UbufSound),
}

impl Ubuf {
    /// Duplicates the buffer: a new view over the same shared storage.
    pub fn dup(&self) -> Self {
        match self {
            Self::Block(b) => Self::Block(b.dup()),
            Self::Pic(p) => Self::Pic(p.dup()),
            Self::Sound(s) => Self::Sound(s.dup()),
        }
    }

    pub const fn as_block(&self) -> Option<&UbufBlock> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_block_mut(&mut self) -> Option<&mut UbufBlock> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }

    pub const fn as_pic(&self) -> Option<&UbufPic> {
        match self {
            Self::Pic(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pic_mut(&mut self) -> Option<&mut UbufPic> {
        match self {
            Self::Pic(p) => Some(p),
            _ => None,
        }
    }

    pub const fn as_sound(&self) -> Option<&UbufSound> {
        match self {
            Self::Sound(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sound_mut(&mut self) -> Option<&mut UbufSound> {
        match self {
            Self::Sound(s) => Some(s),
            _ => None,
        }
    }
}

impl From<UbufBlock> for Ubuf {
    fn from(b: UbufBlock) -> Self {
        Self::Block(b)
    }
}

impl From<UbufPic> for Ubuf {
    fn from(p: UbufPic) -> Self {
        Self::Pic(p)
    }
}

impl From<UbufSound> for Ubuf {
    fn from(s: UbufSound) -> Self {
        Self::Sound(s)
    }
}

/// A handle on a buffer manager of any variant.
///
/// This is what travels through `need-buffer-manager` probes and the
/// get/set-buffer-manager controls; managers themselves are process-wide
/// `Rc` singletons.
#[derive(Clone)]
pub enum UbufMgr {
    Block(Rc<BlockMgr>),
    Pic(Rc<PicMgr>),
    Sound(Rc<SoundMgr>),
}

impl UbufMgr {
    pub fn as_block(&self) -> Option<&Rc<BlockMgr>> {
        match self {
            Self::Block(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_pic(&self) -> Option<&Rc<PicMgr>> {
        match self {
            Self::Pic(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sound(&self) -> Option<&Rc<SoundMgr>> {
        match self {
            Self::Sound(m) => Some(m),
            _ => None,
        }
    }
}

impl std::fmt::Debug for UbufMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block(_) => f.write_str("UbufMgr::Block"),
            Self::Pic(_) => f.write_str("UbufMgr::Pic"),
            Self::Sound(_) => f.write_str("UbufMgr::Sound"),
        }
    }
}
