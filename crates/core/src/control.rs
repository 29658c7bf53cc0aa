// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Control messages for stages.
//!
//! Control is the orthogonal channel to data flow: commands travel
//! on-demand against the data direction or laterally, as exact-typed enum
//! variants rather than variadic argument lists. Every stage either
//! acknowledges a command or refuses it with
//! [`Error::Unhandled`](crate::error::Error::Unhandled).
//!
//! Stage-specific commands ride in [`Control::Stage`] gated by the owning
//! manager's signature; a mismatched signature is rejected with *invalid*.

use crate::buffer::UbufMgr;
use crate::clock::ClockRef;
use crate::pipe::{PipeRef, Signature};
use crate::pump::PumpMgrRef;
use crate::record::Uref;
use std::any::Any;

/// A control command sent to a stage.
pub enum Control {
    /// Asks for the currently wired output.
    GetOutput,
    /// Wires (or unwires) the downstream stage; the flow definition is
    /// replayed to the new output before the next data record.
    SetOutput(Option<PipeRef>),
    /// Asks for the flow definition in use on the output.
    GetFlowDef,
    /// Declares the schema of subsequent input records.
    SetFlowDef(Uref),
    /// Asks for the buffer manager in use.
    GetUbufMgr,
    /// Hands the stage a buffer manager (usually from an injector probe).
    SetUbufMgr(UbufMgr),
    /// Asks for the pump manager in use.
    GetPumpMgr,
    /// Hands the stage a pump manager, or detaches it with `None` —
    /// aborting any deal pump the stage keeps.
    SetPumpMgr(Option<PumpMgrRef>),
    /// Asks the stage to (re-)acquire a pump manager via `need-pump-mgr`.
    AttachPumpMgr,
    /// Asks for the clock in use.
    GetClock,
    /// Hands the stage a clock, or detaches it with `None`.
    SetClock(Option<ClockRef>),
    /// Asks the stage to (re-)acquire a clock via `need-clock`.
    AttachClock,
    /// Registers an externally allocated subpipe with its parent.
    RegisterSub(PipeRef),
    /// Asks for the live subpipes.
    IterateSubs,
    /// Stage-specific command, gated by the manager signature.
    Stage(StageControl),
}

/// Envelope for stage-specific control requests.
pub struct StageControl {
    /// Signature of the manager this request is meant for.
    pub signature: Signature,
    /// The request itself; the stage downcasts it after checking the
    /// signature.
    pub request: Box<dyn Any>,
}

impl StageControl {
    pub fn new(signature: Signature, request: impl Any) -> Self {
        Self { signature, request: Box::new(request) }
    }
}

/// A stage's answer to an acknowledged control command.
pub enum ControlReply {
    /// The command was applied and carries no payload.
    Done,
    Output(Option<PipeRef>),
    FlowDef(Option<Uref>),
    UbufMgr(Option<UbufMgr>),
    PumpMgr(Option<PumpMgrRef>),
    Clock(Option<ClockRef>),
    Subs(Vec<PipeRef>),
    /// Stage-specific reply; the caller downcasts it.
    Stage(Box<dyn Any>),
}

impl ControlReply {
    /// Extracts the output of a [`Control::GetOutput`] reply.
    pub fn into_output(self) -> Option<PipeRef> {
        match self {
            Self::Output(output) => output,
            _ => None,
        }
    }

    /// Extracts the flow definition of a [`Control::GetFlowDef`] reply.
    pub fn into_flow_def(self) -> Option<Uref> {
        match self {
            Self::FlowDef(flow) => flow,
            _ => None,
        }
    }

    /// Extracts the clock of a [`Control::GetClock`] reply.
    pub fn into_clock(self) -> Option<ClockRef> {
        match self {
            Self::Clock(clock) => clock,
            _ => None,
        }
    }

    /// Extracts the subpipes of a [`Control::IterateSubs`] reply.
    pub fn into_subs(self) -> Vec<PipeRef> {
        match self {
            Self::Subs(subs) => subs,
            _ => Vec::new(),
        }
    }

    /// Extracts and downcasts a stage-specific reply.
    pub fn into_stage<T: Any>(self) -> Option<T> {
        match self {
            Self::Stage(payload) => payload.downcast::<T>().ok().map(|b| *b),
            _ => None,
        }
    }
}
