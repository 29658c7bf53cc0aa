// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The subpipe registry capability.
//!
//! Subpipes own their parent (`Rc`), so the parent outlives every child;
//! the parent tracks children weakly, which keeps the embedded tree free
//! of reference cycles. Dead entries are pruned on iteration — a subpipe
//! unregisters by being dropped.

use crate::pipe::Pipe;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub struct SubsCap<T: ?Sized = dyn Pipe> {
    subs: RefCell<Vec<Weak<T>>>,
}

impl<T: ?Sized> Default for SubsCap<T> {
    fn default() -> Self {
        Self { subs: RefCell::new(Vec::new()) }
    }
}

impl<T: ?Sized> SubsCap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly allocated subpipe.
    pub fn register(&self, sub: &Rc<T>) {
        self.subs.borrow_mut().push(Rc::downgrade(sub));
    }

    /// Upgrades the live subpipes in registration order, pruning dead
    /// entries.
    pub fn iterate(&self) -> Vec<Rc<T>> {
        let mut subs = self.subs.borrow_mut();
        subs.retain(|weak| weak.strong_count() > 0);
        subs.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.subs.borrow().iter().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> std::fmt::Debug for SubsCap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsCap").field("live", &self.len()).finish()
    }
}
