// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! PSI section merge stage.
//!
//! Reassembles MPEG-TS PSI sections out of TS payload fragments. Sections
//! are at most 4096 bytes and may be split across any number of payloads;
//! a payload flagged unit-start carries a one-byte `pointer_field` ahead of
//! section data. The stage is a two-state machine:
//!
//! - *desync*: no section boundary seen yet. A unit-start record gives the
//!   byte offset of the next section via its pointer_field; jumping there
//!   acquires sync.
//! - *in-section*: fragments accumulate into a partial record until the
//!   size announced by the 3-byte PSI header is reached, at which point one
//!   complete section is emitted and the residual bytes re-enter the loop.
//!
//! A discontinuity drops the partial section and loses sync.

use rivulet_core::buffer::Ubuf;
use rivulet_core::control::{Control, ControlReply};
use rivulet_core::pipe::caps::{OutputCap, SyncCap};
use rivulet_core::pipe::{self, AllocArg, Pipe, PipeCore, PipeManager, PipeRef, Signature};
use rivulet_core::probe::ProbeChain;
use rivulet_core::pump::PumpRef;
use rivulet_core::record::Uref;
use rivulet_core::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;

pub const PSI_MERGE_SIGNATURE: Signature = *b"psim";

/// We only accept formerly TS packets that contain PSI sections.
const EXPECTED_FLOW_DEF: &str = "block.mpegtspsi.";

/// table_id plus the 16 bits holding the 12-bit section length.
const PSI_HEADER_SIZE: usize = 3;
/// Largest legal private section, header included.
const PSI_MAX_SIZE: usize = 4096;

/// Manager for PSI merge stages.
pub struct PsiMergeMgr;

impl PsiMergeMgr {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }
}

impl PipeManager for PsiMergeMgr {
    fn signature(&self) -> Signature {
        PSI_MERGE_SIGNATURE
    }

    fn alloc(&self, probes: ProbeChain, arg: AllocArg) -> Result<PipeRef> {
        if !matches!(arg, AllocArg::None) {
            return Err(Error::invalid("psi merge takes no allocation argument"));
        }
        let stage = Rc::new(PsiMerge {
            core: PipeCore::new("ts psim", PSI_MERGE_SIGNATURE, probes),
            output: OutputCap::new(),
            sync: SyncCap::new(),
            next: RefCell::new(None),
        });
        pipe::throw_ready(stage.as_ref());
        Ok(stage)
    }
}

/// The PSI merge stage.
pub struct PsiMerge {
    core: PipeCore,
    output: OutputCap,
    sync: SyncCap,
    /// Partial section being accumulated.
    next: RefCell<Option<Uref>>,
}

impl PsiMerge {
    /// Drops the partial section and loses sync.
    fn flush(&self) {
        *self.next.borrow_mut() = None;
        self.sync.lost(self);
    }

    /// One step of the reassembly loop. Returns true while the input record
    /// still holds residual bytes to process.
    fn merge(&self, record: &mut Uref, pump: Option<&PumpRef>) -> bool {
        if self.next.borrow().is_some() {
            let Some(block) = record.ubuf().and_then(Ubuf::as_block) else {
                return false;
            };
            let fragment = block.dup();
            let appended = {
                let mut next = self.next.borrow_mut();
                next.as_mut().map(|partial| partial.block_append(&fragment))
            };
            if let Some(Err(err)) = appended {
                self.flush();
                pipe::throw_fatal(self, err);
                return false;
            }
        } else {
            // Check for stuffing.
            let mut table_id = [0u8; 1];
            if record.block_extract(0, &mut table_id).is_err() || table_id[0] == 0xff {
                return false;
            }
            *self.next.borrow_mut() = Some(record.dup());
        }

        let Some(size) = self.next.borrow().as_ref().and_then(Uref::block_size) else {
            return false;
        };
        if size < PSI_HEADER_SIZE {
            return false;
        }

        let mut header = [0u8; PSI_HEADER_SIZE];
        {
            let next = self.next.borrow();
            let extracted =
                next.as_ref().map(|partial| partial.block_extract(0, &mut header));
            if !matches!(extracted, Some(Ok(()))) {
                return false;
            }
        }
        let length = (usize::from(header[1] & 0x0f) << 8) | usize::from(header[2]);

        if length + PSI_HEADER_SIZE > PSI_MAX_SIZE {
            tracing::warn!(stage = self.core.name(), "wrong PSI header");
            self.flush();
            return false;
        }
        if size < length + PSI_HEADER_SIZE {
            return false;
        }

        let Some(mut section) = self.next.borrow_mut().take() else {
            return false;
        };
        if let Err(err) = section.block_resize(0, Some(length + PSI_HEADER_SIZE)) {
            pipe::throw_fatal(self, err);
            return false;
        }
        self.output.send(self, section, pump);

        if length + PSI_HEADER_SIZE == size {
            return false;
        }
        // The residual of the section boundary sits at the tail of the
        // current input record; trim the record down to it and loop.
        let residual = size - (length + PSI_HEADER_SIZE);
        let Some(record_size) = record.block_size() else {
            return false;
        };
        let Ok(skip) = i64::try_from(record_size - residual) else {
            return false;
        };
        record.block_resize(skip, None).is_ok()
    }
}

impl Pipe for PsiMerge {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn input(&self, mut record: Uref, pump: Option<&PumpRef>) {
        if record.is_flow_def() {
            if !record.match_flow_def(EXPECTED_FLOW_DEF) {
                tracing::warn!(
                    stage = self.core.name(),
                    def = ?record.def(),
                    "rejecting flow definition"
                );
                return;
            }
            self.output.store_flow_def(self, record);
            return;
        }
        if record.ubuf().and_then(Ubuf::as_block).is_none() {
            tracing::warn!(stage = self.core.name(), "dropping record without block payload");
            return;
        }

        if record.has_discontinuity() {
            self.flush();
        }

        if record.has_start() {
            if self.sync.is_acquired() {
                // Just remove the pointer_field.
                if record.block_resize(1, None).is_err() {
                    self.flush();
                    return;
                }
            } else {
                // Jump to the start of the next section.
                let mut pointer_field = [0u8; 1];
                if record.block_extract(0, &mut pointer_field).is_err()
                    || record.block_resize(1 + i64::from(pointer_field[0]), None).is_err()
                {
                    return;
                }
                self.sync.acquired(self);
            }
            record.clear_start();
        } else if self.next.borrow().is_none() {
            self.flush();
            return;
        }

        while self.merge(&mut record, pump) {}
    }

    fn control(&self, control: Control) -> Result<ControlReply> {
        match control {
            Control::GetFlowDef => Ok(ControlReply::FlowDef(self.output.flow_def())),
            Control::SetFlowDef(flow_def) => {
                if !flow_def.match_flow_def(EXPECTED_FLOW_DEF) {
                    return Err(Error::invalid(format!(
                        "flow definition {:?} is not {EXPECTED_FLOW_DEF}",
                        flow_def.def()
                    )));
                }
                self.output.store_flow_def(self, flow_def);
                Ok(ControlReply::Done)
            },
            Control::GetOutput => Ok(ControlReply::Output(self.output.output())),
            Control::SetOutput(output) => {
                self.output.set_output(output);
                Ok(ControlReply::Done)
            },
            _ => Err(Error::Unhandled),
        }
    }
}

impl Drop for PsiMerge {
    fn drop(&mut self) {
        pipe::throw_dead(self);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{
        block_record, record_bytes, split_flow_defs, test_block_mgr, CaptureSink, RecordingProbe,
    };
    use rivulet_core::BlockMgr;

    /// A 15-byte section: table_id 0x02, section length 12 (0x00c).
    const SECTION: [u8; 15] =
        [0x02, 0x80, 0x0c, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    struct Harness {
        stage: PipeRef,
        sink: Rc<CaptureSink>,
        probe: Rc<RecordingProbe>,
        mgr: Rc<BlockMgr>,
    }

    fn harness() -> Harness {
        let probe = RecordingProbe::new();
        let probes = ProbeChain::new().with(probe.clone());
        let stage = PsiMergeMgr::new().alloc(probes, AllocArg::None).unwrap();
        let sink = CaptureSink::new();
        pipe::set_flow_def(&*stage, Uref::flow_def("block.mpegtspsi.")).unwrap();
        pipe::set_output(&*stage, Some(sink.clone())).unwrap();
        Harness { stage, sink, probe, mgr: test_block_mgr() }
    }

    /// Prefixes a zero pointer_field and flags unit-start.
    fn start_record(mgr: &Rc<BlockMgr>, section_bytes: &[u8]) -> Uref {
        let mut payload = vec![0u8];
        payload.extend_from_slice(section_bytes);
        block_record(mgr, &payload, true)
    }

    #[test]
    fn reassembles_a_section_split_across_three_fragments() {
        let h = harness();
        h.stage.input(start_record(&h.mgr, &SECTION[..6]), None);
        h.stage.input(start_record(&h.mgr, &SECTION[6..12]), None);
        assert!(h.sink.is_empty());
        h.stage.input(start_record(&h.mgr, &SECTION[12..]), None);

        let (data, flow_defs) = split_flow_defs(h.sink.take());
        assert_eq!(flow_defs.len(), 1, "flow definition precedes the first section");
        assert!(flow_defs[0].match_flow_def("block.mpegtspsi."));
        assert_eq!(data.len(), 1);
        assert_eq!(record_bytes(&data[0]), SECTION);
        assert!(!data[0].has_start(), "start flags are stripped internally");
        assert_eq!(h.probe.count("sync-acquired"), 1);
    }

    #[test]
    fn stuffing_is_swallowed_without_losing_sync() {
        let h = harness();
        // Acquire sync with a complete minimal section (length 0).
        h.stage.input(start_record(&h.mgr, &[0x02, 0x80, 0x00]), None);
        assert_eq!(h.sink.take_data().len(), 1);

        // Pure stuffing: pointer_field 0, then 0xff bytes.
        h.stage.input(block_record(&h.mgr, &[0x00, 0xff, 0xff, 0xff, 0xff], true), None);
        assert!(h.sink.take_data().is_empty());
        assert_eq!(h.probe.count("sync-lost"), 0);

        // The stage is still in-section: the next fragment reassembles.
        h.stage.input(start_record(&h.mgr, &SECTION), None);
        assert_eq!(record_bytes(&h.sink.take_data()[0]), SECTION);
    }

    #[test]
    fn discontinuity_flushes_and_resyncs() {
        let h = harness();
        h.stage.input(start_record(&h.mgr, &SECTION[..6]), None);

        let mut disc = block_record(&h.mgr, &SECTION[6..], false);
        disc.set_discontinuity();
        h.stage.input(disc, None);
        assert!(h.sink.take_data().is_empty(), "the partial section is dropped");
        assert_eq!(h.probe.count("sync-lost"), 1);

        // A non-start record cannot restart accumulation.
        h.stage.input(block_record(&h.mgr, &SECTION[..4], false), None);
        assert!(h.sink.take_data().is_empty());

        // A unit-start record re-acquires.
        h.stage.input(start_record(&h.mgr, &SECTION), None);
        assert_eq!(record_bytes(&h.sink.take_data()[0]), SECTION);
        assert_eq!(h.probe.count("sync-acquired"), 2);
    }

    #[test]
    fn byte_at_a_time_matches_whole_section() {
        let whole = harness();
        whole.stage.input(start_record(&whole.mgr, &SECTION), None);
        let expected: Vec<_> = whole.sink.take_data().iter().map(record_bytes).collect();

        let trickle = harness();
        trickle.stage.input(start_record(&trickle.mgr, &SECTION[..1]), None);
        for byte in &SECTION[1..] {
            trickle.stage.input(block_record(&trickle.mgr, &[*byte], false), None);
        }
        let got: Vec<_> = trickle.sink.take_data().iter().map(record_bytes).collect();
        assert_eq!(got, expected);
        assert_eq!(got, vec![SECTION.to_vec()]);
    }

    #[test]
    fn two_sections_in_one_payload() {
        let h = harness();
        let mut payload = vec![0u8];
        payload.extend_from_slice(&[0x02, 0x80, 0x01, 0x99]);
        payload.extend_from_slice(&[0x03, 0x80, 0x00]);
        h.stage.input(block_record(&h.mgr, &payload, true), None);

        let sections: Vec<_> = h.sink.take_data().iter().map(record_bytes).collect();
        assert_eq!(sections, vec![vec![0x02, 0x80, 0x01, 0x99], vec![0x03, 0x80, 0x00]]);
    }

    #[test]
    fn oversized_length_field_flushes() {
        let h = harness();
        // length 0xfff: 4095 + 3 > 4096.
        h.stage.input(start_record(&h.mgr, &[0x02, 0x8f, 0xff, 0x01, 0x02]), None);
        assert!(h.sink.take_data().is_empty());
        assert_eq!(h.probe.count("sync-lost"), 1);
    }

    #[test]
    fn foreign_flow_def_is_refused() {
        let h = harness();
        assert!(matches!(
            pipe::set_flow_def(&*h.stage, Uref::flow_def("block.mpeg2video.pic.")),
            Err(Error::Invalid(_))
        ));
        // Input-borne flow definitions take the same path.
        h.stage.input(Uref::flow_def("pic."), None);
        assert!(h.sink.is_empty());
    }

    #[test]
    fn unwired_output_throws_need_output_once() {
        let probe = RecordingProbe::new();
        let stage = PsiMergeMgr::new()
            .alloc(ProbeChain::new().with(probe.clone()), AllocArg::None)
            .unwrap();
        pipe::set_flow_def(&*stage, Uref::flow_def("block.mpegtspsi.")).unwrap();

        let mgr = test_block_mgr();
        stage.input(start_record(&mgr, &[0x02, 0x80, 0x00]), None);
        stage.input(start_record(&mgr, &[0x02, 0x80, 0x00]), None);
        assert_eq!(probe.count("need-output"), 1);
    }
}
