// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Test utilities for stage testing.

use rivulet_core::control::{Control, ControlReply};
use rivulet_core::pipe::{Pipe, PipeCore};
use rivulet_core::probe::{Event, Probe, ProbeChain, ProbeResult};
use rivulet_core::pump::{Pump, PumpRef};
use rivulet_core::record::Uref;
use rivulet_core::{BlockMgr, Error, Result, UmemPool};
use rivulet_core::buffer::block::BlockLayout;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A block buffer manager over a fresh pool, for building test records.
pub fn test_block_mgr() -> Rc<BlockMgr> {
    BlockMgr::new(UmemPool::new(4), BlockLayout::default())
}

/// Builds a data record around `payload` bytes, optionally flagged as
/// unit-start.
///
/// # Panics
///
/// Panics when the backing pool refuses, which test pools never do.
pub fn block_record(mgr: &Rc<BlockMgr>, payload: &[u8], start: bool) -> Uref {
    #[allow(clippy::unwrap_used)]
    let mut record = Uref::from_ubuf(mgr.alloc_from(payload).unwrap());
    if start {
        record.set_start();
    }
    record
}

/// Copies a record's whole block payload out, for assertions.
///
/// # Panics
///
/// Panics when the record has no block payload.
pub fn record_bytes(record: &Uref) -> Vec<u8> {
    #[allow(clippy::unwrap_used)]
    let map = record.block_read(0, None).unwrap();
    map.to_vec()
}

/// A sink stage that captures everything handed to its input.
pub struct CaptureSink {
    core: PipeCore,
    seen: RefCell<Vec<Uref>>,
}

impl CaptureSink {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            core: PipeCore::new("capture", *b"capt", ProbeChain::new()),
            seen: RefCell::new(Vec::new()),
        })
    }

    /// Every record received, in arrival order (flow definitions included).
    pub fn take(&self) -> Vec<Uref> {
        self.seen.borrow_mut().drain(..).collect()
    }

    /// Data records only.
    pub fn take_data(&self) -> Vec<Uref> {
        let (data, _) = split_flow_defs(self.take());
        data
    }

    pub fn len(&self) -> usize {
        self.seen.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.borrow().is_empty()
    }
}

/// Splits captured records into (data, flow definitions), keeping order.
pub fn split_flow_defs(records: Vec<Uref>) -> (Vec<Uref>, Vec<Uref>) {
    records.into_iter().partition(|r| !r.is_flow_def())
}

impl Pipe for CaptureSink {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn input(&self, record: Uref, _pump: Option<&PumpRef>) {
        self.seen.borrow_mut().push(record);
    }

    fn control(&self, control: Control) -> Result<ControlReply> {
        match control {
            Control::SetFlowDef(_) => Ok(ControlReply::Done),
            _ => Err(Error::Unhandled),
        }
    }
}

/// A pump handle whose state tests can observe.
pub struct ManualPump {
    started: Cell<bool>,
    blocked: Cell<bool>,
}

impl ManualPump {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { started: Cell::new(false), blocked: Cell::new(false) })
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.get()
    }
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

/// A probe recording the names of every event it sees; never acknowledges.
#[derive(Default)]
pub struct RecordingProbe {
    events: RefCell<Vec<&'static str>>,
}

impl RecordingProbe {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.borrow().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.borrow().iter().filter(|n| **n == name).count()
    }
}

impl Probe for RecordingProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
        self.events.borrow_mut().push(event.name());
        ProbeResult::Unhandled
    }
}
