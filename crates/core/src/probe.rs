// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Probes: chainable event filters attached to every stage.
//!
//! Stages never talk to their environment directly; they *throw* events at
//! their probe chain. The chain is walked in order and the first handler
//! that acknowledges the event stops propagation. Injector probes answer
//! need-events by calling control back on the throwing stage, which is how
//! buffer managers, clocks and outputs reach stages without hard coupling.
//!
//! Stages must not hold any internal borrow across a throw: a probe may
//! legally re-enter the stage through control.

use crate::buffer::UbufMgr;
use crate::clock::ClockRef;
use crate::control::{Control, ControlReply};
use crate::error::{Error, Result};
use crate::pipe::{Pipe, PipeRef, Signature};
use crate::pump::PumpMgrRef;
use crate::record::Uref;
use std::rc::Rc;

/// An event thrown by a stage at its probe chain.
pub enum Event<'a> {
    /// The stage finished initializing.
    Ready,
    /// The stage is being torn down.
    Dead,
    /// An unrecoverable stage failure; further input will be dropped.
    Fatal(Error),
    /// A recoverable failure worth reporting.
    Error(Error),
    /// The stage needs a buffer manager fitting this flow definition.
    NeedUbufMgr(&'a Uref),
    /// The stage has data but no output wired; payload is the flow
    /// definition it would emit.
    NeedOutput(&'a Uref),
    /// The stage needs a pump manager.
    NeedPumpMgr,
    /// The stage needs a clock.
    NeedClock,
    /// The stage stored a new flow definition for its output.
    NewFlowDef(&'a Uref),
    /// A stateful parser found its framing.
    SyncAcquired,
    /// A stateful parser lost its framing.
    SyncLost,
    /// Stage-specific extension, gated by the manager signature.
    Stage { signature: Signature, payload: &'a dyn std::any::Any },
}

impl Event<'_> {
    /// Short name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::Dead => "dead",
            Event::Fatal(_) => "fatal",
            Event::Error(_) => "error",
            Event::NeedUbufMgr(_) => "need-ubuf-mgr",
            Event::NeedOutput(_) => "need-output",
            Event::NeedPumpMgr => "need-pump-mgr",
            Event::NeedClock => "need-clock",
            Event::NewFlowDef(_) => "new-flow-def",
            Event::SyncAcquired => "sync-acquired",
            Event::SyncLost => "sync-lost",
            Event::Stage { .. } => "stage-specific",
        }
    }
}

/// Outcome of one probe looking at an event.
#[derive(Debug)]
pub enum ProbeResult {
    /// The event was acknowledged; propagation stops.
    Handled,
    /// Not this probe's business; the next one sees the event.
    Unhandled,
    /// The probe tried to handle the event and failed; propagation stops.
    Error(Error),
}

/// One event filter.
pub trait Probe {
    fn catch(&self, pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult;
}

/// An ordered chain of probes, cloned onto every stage at allocation.
#[derive(Clone, Default)]
pub struct ProbeChain {
    probes: Vec<Rc<dyn Probe>>,
}

impl ProbeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a probe; later probes see events the earlier ones decline.
    #[must_use]
    pub fn with(mut self, probe: Rc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn push(&mut self, probe: Rc<dyn Probe>) {
        self.probes.push(probe);
    }

    /// Walks the chain until a probe handles or fails the event.
    pub fn throw(&self, pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
        for probe in &self.probes {
            match probe.catch(pipe, event) {
                ProbeResult::Unhandled => {},
                result => return result,
            }
        }
        ProbeResult::Unhandled
    }
}

/// Renders events through `tracing`, keyed by the stage name. Never
/// acknowledges, so it composes in front of any chain.
pub struct LogProbe;

impl Probe for LogProbe {
    fn catch(&self, pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
        let stage = pipe.core().name();
        match event {
            Event::Fatal(err) => tracing::error!(stage, "fatal event: {err}"),
            Event::Error(err) => tracing::error!(stage, "error event: {err}"),
            Event::SyncLost => tracing::warn!(stage, "sync lost"),
            Event::NewFlowDef(flow) => {
                tracing::debug!(stage, def = ?flow.def(), "new flow definition");
            },
            other => tracing::debug!(stage, event = other.name(), "event"),
        }
        ProbeResult::Unhandled
    }
}

/// Answers `need-ubuf-mgr` with a fixed manager.
pub struct UbufMgrProbe {
    mgr: UbufMgr,
}

impl UbufMgrProbe {
    pub const fn new(mgr: UbufMgr) -> Self {
        Self { mgr }
    }
}

impl Probe for UbufMgrProbe {
    fn catch(&self, pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
        match event {
            Event::NeedUbufMgr(_) => {
                reply(pipe.control(Control::SetUbufMgr(self.mgr.clone())))
            },
            _ => ProbeResult::Unhandled,
        }
    }
}

/// Answers `need-clock` with a fixed clock.
pub struct ClockProbe {
    clock: ClockRef,
}

impl ClockProbe {
    pub const fn new(clock: ClockRef) -> Self {
        Self { clock }
    }
}

impl Probe for ClockProbe {
    fn catch(&self, pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
        match event {
            Event::NeedClock => {
                reply(pipe.control(Control::SetClock(Some(Rc::clone(&self.clock)))))
            },
            _ => ProbeResult::Unhandled,
        }
    }
}

/// Answers `need-pump-mgr` with a fixed pump manager.
pub struct PumpMgrProbe {
    mgr: PumpMgrRef,
}

impl PumpMgrProbe {
    pub const fn new(mgr: PumpMgrRef) -> Self {
        Self { mgr }
    }
}

impl Probe for PumpMgrProbe {
    fn catch(&self, pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
        match event {
            Event::NeedPumpMgr => {
                reply(pipe.control(Control::SetPumpMgr(Some(Rc::clone(&self.mgr)))))
            },
            _ => ProbeResult::Unhandled,
        }
    }
}

/// Auto-wires a fixed output onto stages that throw `need-output`.
pub struct OutputProbe {
    output: PipeRef,
}

impl OutputProbe {
    pub const fn new(output: PipeRef) -> Self {
        Self { output }
    }
}

impl Probe for OutputProbe {
    fn catch(&self, pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
        match event {
            Event::NeedOutput(_) => {
                reply(pipe.control(Control::SetOutput(Some(Rc::clone(&self.output)))))
            },
            _ => ProbeResult::Unhandled,
        }
    }
}

fn reply(result: Result<ControlReply>) -> ProbeResult {
    match result {
        Ok(_) => ProbeResult::Handled,
        Err(err) => ProbeResult::Error(err),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pipe::{self, PipeCore};
    use crate::pump::PumpRef;
    use std::cell::RefCell;

    /// A stage that stores whatever injector probes hand it.
    struct TestStage {
        core: PipeCore,
        clock: RefCell<Option<ClockRef>>,
    }

    impl TestStage {
        fn new(probes: ProbeChain) -> Rc<Self> {
            Rc::new(Self {
                core: PipeCore::new("test", *b"test", probes),
                clock: RefCell::new(None),
            })
        }
    }

    impl Pipe for TestStage {
        fn core(&self) -> &PipeCore {
            &self.core
        }

        fn input(&self, _record: Uref, _pump: Option<&PumpRef>) {}

        fn control(&self, control: Control) -> Result<ControlReply> {
            match control {
                Control::SetClock(clock) => {
                    *self.clock.borrow_mut() = clock;
                    Ok(ControlReply::Done)
                },
                _ => Err(Error::Unhandled),
            }
        }
    }

    struct CountingProbe {
        handle: bool,
        seen: RefCell<u32>,
    }

    impl Probe for CountingProbe {
        fn catch(&self, _pipe: &dyn Pipe, _event: &Event<'_>) -> ProbeResult {
            *self.seen.borrow_mut() += 1;
            if self.handle {
                ProbeResult::Handled
            } else {
                ProbeResult::Unhandled
            }
        }
    }

    #[test]
    fn first_handler_stops_propagation() {
        let first = Rc::new(CountingProbe { handle: false, seen: RefCell::new(0) });
        let second = Rc::new(CountingProbe { handle: true, seen: RefCell::new(0) });
        let third = Rc::new(CountingProbe { handle: false, seen: RefCell::new(0) });
        let stage = TestStage::new(
            ProbeChain::new()
                .with(first.clone())
                .with(second.clone())
                .with(third.clone()),
        );

        let result = pipe::throw(stage.as_ref(), &Event::SyncAcquired);
        assert!(matches!(result, ProbeResult::Handled));
        assert_eq!(*first.seen.borrow(), 1);
        assert_eq!(*second.seen.borrow(), 1);
        assert_eq!(*third.seen.borrow(), 0, "probes after the handler never see the event");
    }

    #[test]
    fn clock_injector_answers_need_clock() {
        let clock = ManualClock::new(42);
        let stage = TestStage::new(ProbeChain::new().with(Rc::new(ClockProbe::new(clock))));

        let result = pipe::throw(stage.as_ref(), &Event::NeedClock);
        assert!(matches!(result, ProbeResult::Handled));
        assert_eq!(stage.clock.borrow().as_ref().map(|c| c.now()), Some(42));
    }

    #[test]
    fn injector_failure_surfaces_as_probe_error() {
        // The test stage refuses SetOutput, so the auto-wire probe errors.
        let sink = TestStage::new(ProbeChain::new());
        let stage =
            TestStage::new(ProbeChain::new().with(Rc::new(OutputProbe::new(sink))));

        let flow_def = Uref::flow_def("pic.");
        let result = pipe::throw(stage.as_ref(), &Event::NeedOutput(&flow_def));
        assert!(matches!(result, ProbeResult::Error(Error::Unhandled)));
    }
}
