// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The synchronization-state capability for stateful parsers.
//!
//! Tracks whether the stage currently understands its input framing, and
//! throws the edge-triggered `sync-acquired` / `sync-lost` events — never
//! twice in a row for the same state.

use crate::pipe::{throw, Pipe};
use crate::probe::Event;
use std::cell::Cell;

#[derive(Debug, Default)]
pub struct SyncCap {
    acquired: Cell<bool>,
}

impl SyncCap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.get()
    }

    /// Notes that framing was found; throws `sync-acquired` on the edge.
    pub fn acquired(&self, pipe: &dyn Pipe) {
        if !self.acquired.replace(true) {
            let _ = throw(pipe, &Event::SyncAcquired);
        }
    }

    /// Notes that framing was lost; throws `sync-lost` on the edge.
    pub fn lost(&self, pipe: &dyn Pipe) {
        if self.acquired.replace(false) {
            let _ = throw(pipe, &Event::SyncLost);
        }
    }
}
