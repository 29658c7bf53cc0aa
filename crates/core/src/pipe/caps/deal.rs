// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The deal capability: exclusive access to a foreign-library critical
//! section without blocking the loop thread.
//!
//! Some libraries serialize expensive entry points (codec open/close)
//! behind a global lock. A stage never takes that lock synchronously;
//! instead it posts a [`DealPump`] that retries a non-blocking grab from
//! the event loop, runs the protected work once granted, then yields.
//! While the deal is pending the stage holds its sink and blocks the
//! producing pumps; an abort (teardown, pump-manager change) cancels the
//! pump and the stage flushes the queue.

use crate::error::Result;
use crate::pump::{PumpManager, PumpRef};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A non-blocking mutual exclusion token, shared by every stage contending
/// for the same foreign library.
#[derive(Default)]
pub struct Deal {
    locked: Cell<bool>,
}

impl Deal {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Attempts the grab. Returns true on success; the caller must
    /// [`release`](Self::release).
    pub fn try_grab(&self) -> bool {
        !self.locked.replace(true)
    }

    /// Releases a successful grab.
    pub fn release(&self) {
        self.locked.set(false);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

struct DealPumpInner {
    deal: Rc<Deal>,
    pump: RefCell<Option<PumpRef>>,
    done: Cell<bool>,
}

/// A pending exclusive-access request.
///
/// The underlying idler refires until the grab succeeds; the protected work
/// runs exactly once, after which the pump is stopped and freed.
pub struct DealPump {
    inner: Rc<DealPumpInner>,
}

impl DealPump {
    /// Posts the request on `mgr`'s loop. `work` runs on the loop thread
    /// under the grab.
    ///
    /// # Errors
    ///
    /// [`Error::Pump`](crate::error::Error::Pump) when the idler cannot be
    /// allocated.
    pub fn start(
        deal: &Rc<Deal>,
        mgr: &dyn PumpManager,
        work: Box<dyn FnOnce()>,
    ) -> Result<Self> {
        let inner = Rc::new(DealPumpInner {
            deal: Rc::clone(deal),
            pump: RefCell::new(None),
            done: Cell::new(false),
        });
        let cb_inner = Rc::clone(&inner);
        let work = RefCell::new(Some(work));
        let pump = mgr.alloc_idler(Box::new(move || {
            if cb_inner.done.get() {
                return;
            }
            if !cb_inner.deal.try_grab() {
                // Contended; the idler refires on the next loop turn.
                return;
            }
            if let Some(work) = work.borrow_mut().take() {
                work();
            }
            cb_inner.deal.release();
            cb_inner.done.set(true);
            if let Some(pump) = cb_inner.pump.borrow_mut().take() {
                pump.stop();
            }
        }))?;
        *inner.pump.borrow_mut() = Some(Rc::clone(&pump));
        pump.start();
        Ok(Self { inner })
    }

    /// True once the protected work has run.
    pub fn is_done(&self) -> bool {
        self.inner.done.get()
    }

    /// Cancels a pending request. The work will not run; already-completed
    /// deals are unaffected.
    pub fn abort(&self) {
        self.inner.done.set(true);
        if let Some(pump) = self.inner.pump.borrow_mut().take() {
            pump.stop();
        }
    }
}

impl Drop for DealPump {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pump::{Pump, PumpCallback, PumpManager};
    use std::os::fd::RawFd;

    /// A loop that runs idlers when asked, for deterministic tests.
    #[derive(Default)]
    struct ManualLoop {
        pumps: RefCell<Vec<Rc<ManualPump>>>,
    }

    struct ManualPump {
        cb: RefCell<PumpCallback>,
        started: Cell<bool>,
        blocked: Cell<bool>,
    }

    impl Pump for ManualPump {
        fn start(&self) {
            self.started.set(true);
        }
        fn stop(&self) {
            self.started.set(false);
        }
        fn block(&self) {
            self.blocked.set(true);
        }
        fn unblock(&self) {
            self.blocked.set(false);
        }
    }

    impl ManualLoop {
        fn turn(&self) {
            let pumps: Vec<_> = self.pumps.borrow().clone();
            for pump in pumps {
                if pump.started.get() && !pump.blocked.get() {
                    (pump.cb.borrow_mut())();
                }
            }
        }
    }

    impl PumpManager for ManualLoop {
        fn alloc_timer(&self, _: u64, _: u64, cb: PumpCallback) -> Result<PumpRef> {
            self.alloc_idler(cb)
        }
        fn alloc_idler(&self, cb: PumpCallback) -> Result<PumpRef> {
            let pump = Rc::new(ManualPump {
                cb: RefCell::new(cb),
                started: Cell::new(false),
                blocked: Cell::new(false),
            });
            self.pumps.borrow_mut().push(Rc::clone(&pump));
            Ok(pump)
        }
        fn alloc_fd_read(&self, _: RawFd, _: PumpCallback) -> Result<PumpRef> {
            Err(Error::Pump("no fd support in the manual loop".into()))
        }
        fn alloc_fd_write(&self, _: RawFd, _: PumpCallback) -> Result<PumpRef> {
            Err(Error::Pump("no fd support in the manual loop".into()))
        }
    }

    #[test]
    fn deal_retries_until_granted() {
        let deal = Deal::new();
        let lp = ManualLoop::default();
        assert!(deal.try_grab());

        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let pump = DealPump::start(&deal, &lp, Box::new(move || flag.set(true))).unwrap();

        lp.turn();
        assert!(!pump.is_done(), "deal held elsewhere, work must wait");

        deal.release();
        lp.turn();
        assert!(pump.is_done());
        assert!(ran.get());
        assert!(!deal.is_locked(), "deal yielded after the work");

        // Completed deals ignore further loop turns.
        lp.turn();
    }

    #[test]
    fn aborted_deal_never_runs() {
        let deal = Deal::new();
        let lp = ManualLoop::default();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let pump = DealPump::start(&deal, &lp, Box::new(move || flag.set(true))).unwrap();
        pump.abort();
        lp.turn();
        assert!(!ran.get());
        assert!(!deal.is_locked());
    }
}
