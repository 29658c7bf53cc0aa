// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Event pumps: the adapter between the framework and an external event
//! loop.
//!
//! The framework never owns a loop; it asks a [`PumpManager`] for handles —
//! timers, idlers, file-descriptor watchers — and drives the pipeline from
//! their callbacks. Callbacks are plain closures capturing `Rc` stage
//! handles, replacing the opaque-pointer convention of C reactors.
//!
//! Pumps can also be *blocked*: a sink that cannot take more data asks the
//! pump that produced the record to pause, and unblocks it once the
//! congestion clears. Dropping the last handle to a pump frees it.
//!
//! Adapter implementations live outside the core (`rivulet-pump-tokio`
//! provides one); tests use a manual pump.

use crate::error::Result;
use std::os::fd::RawFd;
use std::rc::Rc;

/// Callback invoked by the loop when a pump fires. Runs on the loop thread.
pub type PumpCallback = Box<dyn FnMut()>;

/// An allocated event-loop handle.
pub trait Pump {
    /// Arms the pump. Idempotent.
    fn start(&self);

    /// Disarms the pump without freeing it. Idempotent.
    fn stop(&self);

    /// Pauses callback delivery at the producer's request (sink
    /// backpressure). The pump stays armed.
    fn block(&self);

    /// Resumes callback delivery.
    fn unblock(&self);
}

/// Shared pump handle. Records travelling through `input` carry the pump
/// that produced them so sinks can block it.
pub type PumpRef = Rc<dyn Pump>;

/// Factory interface over an external event loop.
pub trait PumpManager {
    /// A timer firing `after` ticks from now, then every `repeat` ticks;
    /// `repeat == 0` makes it a one-shot. Times are 27 MHz ticks.
    ///
    /// # Errors
    ///
    /// [`Error::Pump`](crate::error::Error::Pump) when the loop refuses the
    /// allocation.
    fn alloc_timer(&self, after: u64, repeat: u64, cb: PumpCallback) -> Result<PumpRef>;

    /// An idler invoked whenever the loop has nothing better to do.
    ///
    /// # Errors
    ///
    /// [`Error::Pump`](crate::error::Error::Pump) when the loop refuses the
    /// allocation.
    fn alloc_idler(&self, cb: PumpCallback) -> Result<PumpRef>;

    /// A watcher firing when `fd` becomes readable.
    ///
    /// # Errors
    ///
    /// [`Error::Pump`](crate::error::Error::Pump) when the loop refuses the
    /// allocation.
    fn alloc_fd_read(&self, fd: RawFd, cb: PumpCallback) -> Result<PumpRef>;

    /// A watcher firing when `fd` becomes writable.
    ///
    /// # Errors
    ///
    /// [`Error::Pump`](crate::error::Error::Pump) when the loop refuses the
    /// allocation.
    fn alloc_fd_write(&self, fd: RawFd, cb: PumpCallback) -> Result<PumpRef>;
}

/// Shared pump-manager handle.
pub type PumpMgrRef = Rc<dyn PumpManager>;
