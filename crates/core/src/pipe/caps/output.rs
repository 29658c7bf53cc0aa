// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The output capability: a single downstream stage plus the flow
//! definition replayed to it.
//!
//! Guarantees the output contract: the first record a stage emits after a
//! flow-definition change (or after rewiring) is the flow definition
//! itself; a data record never reaches a downstream stage that has not
//! seen a matching definition.

use crate::pipe::{throw, Pipe, PipeRef};
use crate::probe::Event;
use crate::pump::PumpRef;
use crate::record::Uref;
use std::cell::{Cell, RefCell};

#[derive(Default)]
pub struct OutputCap {
    output: RefCell<Option<PipeRef>>,
    flow_def: RefCell<Option<Uref>>,
    flow_def_sent: Cell<bool>,
    need_output_thrown: Cell<bool>,
}

impl OutputCap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the flow definition to use on the output and schedules its
    /// replay before the next data record.
    pub fn store_flow_def(&self, pipe: &dyn Pipe, flow_def: Uref) {
        let _ = throw(pipe, &Event::NewFlowDef(&flow_def));
        *self.flow_def.borrow_mut() = Some(flow_def);
        self.flow_def_sent.set(false);
    }

    /// The flow definition in use on the output, duplicated.
    pub fn flow_def(&self) -> Option<Uref> {
        self.flow_def.borrow().as_ref().map(Uref::dup)
    }

    pub fn output(&self) -> Option<PipeRef> {
        self.output.borrow().clone()
    }

    /// Wires a new output; the stored flow definition will be replayed to
    /// it before the next data record.
    pub fn set_output(&self, output: Option<PipeRef>) {
        *self.output.borrow_mut() = output;
        self.flow_def_sent.set(false);
        self.need_output_thrown.set(false);
    }

    /// Sends a record downstream, replaying the flow definition first when
    /// needed.
    ///
    /// With no output wired, throws `need-output` once (a probe may wire
    /// one on the spot); if still unwired, the record is dropped with a
    /// warning. Without a stored flow definition, data is dropped too.
    pub fn send(&self, pipe: &dyn Pipe, record: Uref, pump: Option<&PumpRef>) {
        if self.output.borrow().is_none() {
            let flow_def = self.flow_def();
            if let Some(flow_def) = flow_def {
                if !self.need_output_thrown.replace(true) {
                    let _ = throw(pipe, &Event::NeedOutput(&flow_def));
                }
            }
        }
        let Some(output) = self.output.borrow().clone() else {
            tracing::warn!(stage = pipe.core().name(), "no output wired, dropping record");
            return;
        };

        if !self.flow_def_sent.get() {
            let Some(flow_def) = self.flow_def() else {
                tracing::warn!(stage = pipe.core().name(), "no flow definition, dropping record");
                return;
            };
            output.input(flow_def, pump);
            self.flow_def_sent.set(true);
        }
        output.input(record, pump);
    }

    /// Drops the output and the stored definition, typically at teardown.
    pub fn clean(&self) {
        *self.output.borrow_mut() = None;
        *self.flow_def.borrow_mut() = None;
        self.flow_def_sent.set(false);
    }
}

impl std::fmt::Debug for OutputCap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCap")
            .field("wired", &self.output.borrow().is_some())
            .field("flow_def_sent", &self.flow_def_sent.get())
            .finish_non_exhaustive()
    }
}
