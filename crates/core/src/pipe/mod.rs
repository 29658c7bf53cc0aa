// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stages ("pipes") and their managers.
//!
//! A stage is a reference-counted node dispatching through the [`Pipe`]
//! trait: data enters through [`Pipe::input`] (which takes ownership of the
//! record), control through [`Pipe::control`]. A [`PipeManager`] is the
//! process-wide factory for one stage kind, identified by a four-byte
//! [`Signature`].
//!
//! The graph holds strong references left to right — each stage owns its
//! output — so releasing a source cascades linearly. Subpipes own their
//! parent and are tracked by it through weak references (see
//! [`caps::SubsCap`]), which embeds the parent/child tree in the DAG
//! without cycles.
//!
//! Cross-cutting features every other stage needs — output wiring, sink
//! holding, subpipe registries, sync state, deals — are composable
//! capability structs in [`caps`].

pub mod caps;

use crate::control::{Control, ControlReply};
use crate::error::{Error, Result};
use crate::probe::{Event, ProbeChain, ProbeResult};
use crate::pump::PumpRef;
use crate::record::Uref;
use std::rc::Rc;

/// Four-byte tag identifying a manager kind.
pub type Signature = [u8; 4];

/// A processing stage.
pub trait Pipe {
    /// The common per-stage state (name, signature, probe chain).
    fn core(&self) -> &PipeCore;

    /// Feeds one record. Ownership transfers: the stage forwards, holds or
    /// drops the record, on every path. `pump` identifies the event-loop
    /// handle that produced the record so sinks can block it.
    fn input(&self, record: Uref, pump: Option<&PumpRef>);

    /// Processes one control command.
    ///
    /// # Errors
    ///
    /// [`Error::Unhandled`] for commands this stage does not recognize;
    /// [`Error::Invalid`] for recognized commands with unacceptable
    /// payloads.
    fn control(&self, control: Control) -> Result<ControlReply>;
}

/// Shared stage handle. The strong count is the stage's reference count.
pub type PipeRef = Rc<dyn Pipe>;

/// State common to every stage, embedded in each implementation.
pub struct PipeCore {
    name: &'static str,
    signature: Signature,
    probes: ProbeChain,
}

impl PipeCore {
    pub fn new(name: &'static str, signature: Signature, probes: ProbeChain) -> Self {
        Self { name, signature, probes }
    }

    /// Stage kind name, used for logging.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn signature(&self) -> Signature {
        self.signature
    }

    pub const fn probes(&self) -> &ProbeChain {
        &self.probes
    }
}

/// Argument of a manager allocation.
pub enum AllocArg {
    /// The stage needs nothing beyond its probes.
    None,
    /// The stage is allocated against a flow definition (subpipes of a
    /// demultiplexer, for instance).
    FlowDef(Uref),
}

/// Process-wide factory for one stage kind.
pub trait PipeManager {
    fn signature(&self) -> Signature;

    /// Allocates a stage. The probe chain is cloned onto the stage; the
    /// stage throws `ready` before returning.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] when `arg` does not fit the stage kind,
    /// [`Error::OutOfMemory`] when allocation fails.
    fn alloc(&self, probes: ProbeChain, arg: AllocArg) -> Result<PipeRef>;
}

/// Throws an event at a stage's probe chain.
pub fn throw(pipe: &dyn Pipe, event: &Event<'_>) -> ProbeResult {
    pipe.core().probes().throw(pipe, event)
}

/// Throws `ready` after a stage finished initializing.
pub fn throw_ready(pipe: &dyn Pipe) {
    let _ = throw(pipe, &Event::Ready);
}

/// Throws `dead` during teardown.
pub fn throw_dead(pipe: &dyn Pipe) {
    let _ = throw(pipe, &Event::Dead);
}

/// Throws a fatal error; the stage is expected to drop further input.
pub fn throw_fatal(pipe: &dyn Pipe, err: Error) {
    let _ = throw(pipe, &Event::Fatal(err));
}

/// Throws a recoverable error.
pub fn throw_error(pipe: &dyn Pipe, err: Error) {
    let _ = throw(pipe, &Event::Error(err));
}

// --- typed control wrappers ---

/// Wires `output` downstream of `pipe`.
///
/// # Errors
///
/// Propagates the stage's refusal.
pub fn set_output(pipe: &dyn Pipe, output: Option<PipeRef>) -> Result<()> {
    pipe.control(Control::SetOutput(output)).map(|_| ())
}

/// Returns the stage's wired output.
///
/// # Errors
///
/// Propagates the stage's refusal.
pub fn get_output(pipe: &dyn Pipe) -> Result<Option<PipeRef>> {
    pipe.control(Control::GetOutput).map(ControlReply::into_output)
}

/// Declares the input flow definition of `pipe`.
///
/// # Errors
///
/// [`Error::Invalid`] when the stage cannot accept the definition.
pub fn set_flow_def(pipe: &dyn Pipe, flow_def: Uref) -> Result<()> {
    pipe.control(Control::SetFlowDef(flow_def)).map(|_| ())
}

/// Returns the flow definition the stage uses on its output.
///
/// # Errors
///
/// Propagates the stage's refusal.
pub fn get_flow_def(pipe: &dyn Pipe) -> Result<Option<Uref>> {
    pipe.control(Control::GetFlowDef).map(ControlReply::into_flow_def)
}

/// Hands the stage a clock.
///
/// # Errors
///
/// Propagates the stage's refusal.
pub fn set_clock(pipe: &dyn Pipe, clock: Option<crate::clock::ClockRef>) -> Result<()> {
    pipe.control(Control::SetClock(clock)).map(|_| ())
}

/// Returns the stage's live subpipes.
///
/// # Errors
///
/// Propagates the stage's refusal.
pub fn iterate_subs(pipe: &dyn Pipe) -> Result<Vec<PipeRef>> {
    pipe.control(Control::IterateSubs).map(ControlReply::into_subs)
}
