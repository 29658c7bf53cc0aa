// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Trick-play stage.
//!
//! One parent with a subpipe per media track; each subpipe is classified on
//! its flow definition as picture, sound or subpicture. The stage converts
//! program-timeline timestamps into system-timeline timestamps scaled by a
//! rational playback rate:
//!
//! ```text
//! sys = (ts - ts_origin) * rate.den / rate.num + systime_offset
//! ```
//!
//! Playback only starts once every non-subpicture track has a dated record
//! queued, so that tracks come up aligned; `ts_origin` is the earliest
//! timestamp across them and `systime_offset` lands 100 ms in the future to
//! leave the pipeline time to prime. A rate of `0` pauses: records are held
//! and the producing pumps blocked. Changing the rate re-anchors the
//! timeline from scratch.

use rivulet_core::clock::ClockRef;
use rivulet_core::control::{Control, ControlReply, StageControl};
use rivulet_core::pipe::caps::{OutputCap, SinkCap, SubsCap};
use rivulet_core::pipe::{self, AllocArg, Pipe, PipeCore, PipeManager, PipeRef, Signature};
use rivulet_core::probe::{Event, ProbeChain};
use rivulet_core::pump::PumpRef;
use rivulet_core::record::{ClockBase, Uref};
use rivulet_core::{Error, Rational, Result, UCLOCK_FREQ};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const TRICK_PLAY_SIGNATURE: Signature = *b"trik";
pub const TRICK_PLAY_SUB_SIGNATURE: Signature = *b"trks";

/// Minimum amount of time before presenting a flow.
const PTS_DELAY: u64 = UCLOCK_FREQ / 10;

/// Stage-specific control requests, gated by [`TRICK_PLAY_SIGNATURE`].
pub enum TrickPlayControl {
    GetRate,
    /// `1/1` plays normally, `0` pauses. Re-anchors the timeline.
    SetRate(Rational),
}

/// Returns the current playback rate of a trick-play stage.
///
/// # Errors
///
/// [`Error::Invalid`] when `pipe` is not a trick-play stage.
pub fn get_rate(pipe: &dyn Pipe) -> Result<Rational> {
    pipe.control(Control::Stage(StageControl::new(
        TRICK_PLAY_SIGNATURE,
        TrickPlayControl::GetRate,
    )))?
    .into_stage::<Rational>()
    .ok_or_else(|| Error::invalid("unexpected reply to get-rate"))
}

/// Sets the playback rate of a trick-play stage.
///
/// # Errors
///
/// [`Error::Invalid`] when `pipe` is not a trick-play stage.
pub fn set_rate(pipe: &dyn Pipe, rate: Rational) -> Result<()> {
    pipe.control(Control::Stage(StageControl::new(
        TRICK_PLAY_SIGNATURE,
        TrickPlayControl::SetRate(rate),
    )))
    .map(|_| ())
}

/// Manager for trick-play stages.
pub struct TrickPlayMgr;

impl TrickPlayMgr {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }

    /// Concrete allocation, keeping the handle needed to allocate subpipes.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible to match the manager contract.
    pub fn alloc_trick_play(probes: ProbeChain) -> Result<Rc<TrickPlay>> {
        let stage = Rc::new(TrickPlay {
            core: PipeCore::new("trickp", TRICK_PLAY_SIGNATURE, probes),
            clock: RefCell::new(None),
            ts_origin: Cell::new(0),
            systime_offset: Cell::new(0),
            rate: Cell::new(Rational::ONE),
            subs: SubsCap::new(),
        });
        pipe::throw_ready(stage.as_ref());
        Ok(stage)
    }
}

impl PipeManager for TrickPlayMgr {
    fn signature(&self) -> Signature {
        TRICK_PLAY_SIGNATURE
    }

    fn alloc(&self, probes: ProbeChain, arg: AllocArg) -> Result<PipeRef> {
        if !matches!(arg, AllocArg::None) {
            return Err(Error::invalid("trick play takes no allocation argument"));
        }
        Ok(TrickPlayMgr::alloc_trick_play(probes)?)
    }
}

/// Track classification, from the subpipe flow definition prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubKind {
    Pic,
    Sound,
    Subpic,
}

fn classify(flow_def: &Uref) -> SubKind {
    match flow_def.def() {
        Some(def) if def.starts_with("pic.sub.") => SubKind::Subpic,
        Some(def) if def.starts_with("pic.") => SubKind::Pic,
        Some(_) => SubKind::Sound,
        None => SubKind::Subpic,
    }
}

/// The trick-play parent stage.
pub struct TrickPlay {
    core: PipeCore,
    clock: RefCell<Option<ClockRef>>,
    /// Origin of program timestamps, set at start.
    ts_origin: Cell<u64>,
    /// System time at which playback begins; 0 while not started.
    systime_offset: Cell<u64>,
    rate: Cell<Rational>,
    subs: SubsCap<TrickPlaySub>,
}

impl TrickPlay {
    /// Builds the manager allocating subpipes of this stage.
    pub fn sub_mgr(self: &Rc<Self>) -> Rc<TrickPlaySubMgr> {
        Rc::new(TrickPlaySubMgr { parent: Rc::clone(self) })
    }

    fn has_clock(&self) -> bool {
        self.clock.borrow().is_some()
    }

    fn now(&self) -> Option<u64> {
        self.clock.borrow().as_ref().map(|clock| clock.now())
    }

    fn store_clock(&self, clock: Option<ClockRef>) {
        self.reset_anchor();
        *self.clock.borrow_mut() = clock;
    }

    fn reset_anchor(&self) {
        self.systime_offset.set(0);
        self.ts_origin.set(0);
    }

    /// Converts a program timestamp to a system timestamp.
    ///
    /// Timestamps from before the origin are clamped so the output stays
    /// monotonic.
    #[allow(clippy::cast_possible_truncation)]
    fn systime(&self, mut ts: u64) -> u64 {
        if ts < self.ts_origin.get() {
            tracing::warn!(stage = self.core.name(), "got a timestamp in the past");
            ts = self.ts_origin.get();
        }
        let rate = self.rate.get();
        let scaled =
            u128::from(ts - self.ts_origin.get()) * u128::from(rate.den) / u128::from(rate.num);
        scaled as u64 + self.systime_offset.get()
    }

    /// Checks whether every non-subpicture track has a dated record queued;
    /// if so, anchors the timeline and drains every subpipe.
    fn check_start(&self) {
        let mut earliest = u64::MAX;
        for sub in self.subs.iterate() {
            if sub.kind == SubKind::Subpic {
                continue;
            }
            loop {
                let front = sub.sink.peek(|front| {
                    front.map(|r| r.dts(ClockBase::Prog).or_else(|| r.pts(ClockBase::Prog)))
                });
                match front {
                    // Not ready: this track has nothing queued yet.
                    None => return,
                    Some(None) => {
                        tracing::warn!(stage = self.core.name(), "non-dated record");
                        drop(sub.sink.pop());
                    },
                    Some(Some(ts)) => {
                        earliest = earliest.min(ts);
                        break;
                    },
                }
            }
        }
        let Some(now) = self.now() else { return };

        self.ts_origin.set(earliest);
        self.systime_offset.set(now + PTS_DELAY);

        for sub in self.subs.iterate() {
            if sub.sink.drain(|record| sub.process(record, None)) {
                sub.sink.unblock_all();
            }
        }
    }
}

impl Pipe for TrickPlay {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn input(&self, _record: Uref, _pump: Option<&PumpRef>) {
        // Data enters through the subpipes only.
        tracing::warn!(stage = self.core.name(), "dropping record fed to the parent");
    }

    fn control(&self, control: Control) -> Result<ControlReply> {
        match control {
            Control::GetClock => Ok(ControlReply::Clock(self.clock.borrow().clone())),
            Control::SetClock(clock) => {
                self.store_clock(clock);
                Ok(ControlReply::Done)
            },
            Control::AttachClock => {
                let _ = pipe::throw(self, &Event::NeedClock);
                Ok(ControlReply::Done)
            },
            Control::IterateSubs => Ok(ControlReply::Subs(
                self.subs.iterate().into_iter().map(|sub| -> PipeRef { sub }).collect(),
            )),
            Control::Stage(StageControl { signature, request }) => {
                if signature != TRICK_PLAY_SIGNATURE {
                    return Err(Error::invalid("control signature mismatch"));
                }
                let request = request
                    .downcast::<TrickPlayControl>()
                    .map_err(|_| Error::invalid("unknown trick-play request"))?;
                match *request {
                    TrickPlayControl::GetRate => {
                        Ok(ControlReply::Stage(Box::new(self.rate.get())))
                    },
                    TrickPlayControl::SetRate(rate) => {
                        self.rate.set(rate);
                        self.reset_anchor();
                        self.check_start();
                        Ok(ControlReply::Done)
                    },
                }
            },
            _ => Err(Error::Unhandled),
        }
    }
}

impl Drop for TrickPlay {
    fn drop(&mut self) {
        pipe::throw_dead(self);
    }
}

/// Manager allocating subpipes of one trick-play stage.
pub struct TrickPlaySubMgr {
    parent: Rc<TrickPlay>,
}

impl PipeManager for TrickPlaySubMgr {
    fn signature(&self) -> Signature {
        TRICK_PLAY_SUB_SIGNATURE
    }

    fn alloc(&self, probes: ProbeChain, arg: AllocArg) -> Result<PipeRef> {
        let AllocArg::FlowDef(flow_def) = arg else {
            return Err(Error::invalid("trick-play subpipes are allocated on a flow definition"));
        };
        let sub = Rc::new(TrickPlaySub {
            core: PipeCore::new("trickp sub", TRICK_PLAY_SUB_SIGNATURE, probes),
            parent: Rc::clone(&self.parent),
            kind: classify(&flow_def),
            output: OutputCap::new(),
            sink: SinkCap::new(),
        });
        sub.output.store_flow_def(sub.as_ref(), flow_def);
        self.parent.subs.register(&sub);
        pipe::throw_ready(sub.as_ref());
        Ok(sub)
    }
}

/// One track of a trick-play stage.
pub struct TrickPlaySub {
    core: PipeCore,
    /// Owning back reference: the parent outlives its tracks.
    parent: Rc<TrickPlay>,
    kind: SubKind,
    output: OutputCap,
    sink: SinkCap,
}

impl TrickPlaySub {
    /// Remaps and emits one record. Gives the record back when playback is
    /// paused.
    fn process(&self, mut record: Uref, pump: Option<&PumpRef>) -> Option<Uref> {
        let rate = self.parent.rate.get();
        if rate.is_zero() {
            return Some(record);
        }

        record.set_rate(rate);
        if let Some(pts) = record.pts(ClockBase::Prog) {
            record.set_pts(ClockBase::Sys, self.parent.systime(pts));
        }
        if let Some(dts) = record.dts(ClockBase::Prog) {
            record.set_dts(ClockBase::Sys, self.parent.systime(dts));
        }
        self.output.send(self, record, pump);
        None
    }
}

impl Pipe for TrickPlaySub {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn input(&self, record: Uref, pump: Option<&PumpRef>) {
        if record.is_flow_def() {
            // The track keeps its classification; schema updates still
            // propagate downstream.
            self.output.store_flow_def(self, record);
            return;
        }
        if !self.parent.has_clock() {
            let _ = pipe::throw(self, &Event::NeedClock);
            if !self.parent.has_clock() {
                return;
            }
        }

        if self.parent.rate.get().is_zero() {
            // Pause.
            self.sink.hold(record);
            self.sink.block(pump);
        } else if self.parent.systime_offset.get() == 0 {
            self.sink.hold(record);
            self.parent.check_start();
        } else if !self.sink.is_empty() {
            self.sink.hold(record);
            self.sink.block(pump);
        } else if let Some(record) = self.process(record, pump) {
            self.sink.hold(record);
            self.sink.block(pump);
        }
    }

    fn control(&self, control: Control) -> Result<ControlReply> {
        match control {
            Control::GetFlowDef => Ok(ControlReply::FlowDef(self.output.flow_def())),
            Control::GetOutput => Ok(ControlReply::Output(self.output.output())),
            Control::SetOutput(output) => {
                self.output.set_output(output);
                Ok(ControlReply::Done)
            },
            // The clock lives on the parent; injector probes answering the
            // subpipe's need-clock land here.
            Control::GetClock => Ok(ControlReply::Clock(self.parent.clock.borrow().clone())),
            Control::SetClock(clock) => {
                self.parent.store_clock(clock);
                Ok(ControlReply::Done)
            },
            _ => Err(Error::Unhandled),
        }
    }
}

impl Drop for TrickPlaySub {
    fn drop(&mut self) {
        pipe::throw_dead(self);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{block_record, test_block_mgr, CaptureSink, ManualPump, RecordingProbe};
    use rivulet_core::clock::ManualClock;
    use rivulet_core::probe::ClockProbe;
    use rivulet_core::BlockMgr;

    struct Harness {
        trickp: Rc<TrickPlay>,
        pic: PipeRef,
        sound: PipeRef,
        pic_sink: Rc<CaptureSink>,
        sound_sink: Rc<CaptureSink>,
        clock: Rc<ManualClock>,
        mgr: Rc<BlockMgr>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(10_000);
        let trickp = TrickPlayMgr::alloc_trick_play(ProbeChain::new()).unwrap();
        pipe::set_clock(trickp.as_ref(), Some(clock.clone())).unwrap();

        let sub_mgr = trickp.sub_mgr();
        let pic = sub_mgr
            .alloc(ProbeChain::new(), AllocArg::FlowDef(Uref::flow_def("pic.")))
            .unwrap();
        let sound = sub_mgr
            .alloc(ProbeChain::new(), AllocArg::FlowDef(Uref::flow_def("sound.")))
            .unwrap();

        let pic_sink = CaptureSink::new();
        let sound_sink = CaptureSink::new();
        pipe::set_output(&*pic, Some(pic_sink.clone())).unwrap();
        pipe::set_output(&*sound, Some(sound_sink.clone())).unwrap();

        Harness { trickp, pic, sound, pic_sink, sound_sink, clock, mgr: test_block_mgr() }
    }

    fn dated_record(mgr: &Rc<BlockMgr>, pts: u64) -> Uref {
        let mut record = block_record(mgr, &[0], false);
        record.set_pts(ClockBase::Prog, pts);
        record
    }

    #[test]
    fn start_waits_for_every_track_and_aligns_them() {
        let h = harness();
        h.pic.input(dated_record(&h.mgr, 1000), None);
        assert!(h.pic_sink.is_empty(), "one track alone does not start playback");

        h.sound.input(dated_record(&h.mgr, 1500), None);
        let pic_out = h.pic_sink.take_data();
        let sound_out = h.sound_sink.take_data();
        assert_eq!(pic_out.len(), 1);
        assert_eq!(sound_out.len(), 1);

        // ts_origin = 1000, systime_offset = now + 100 ms.
        let offset = 10_000 + PTS_DELAY;
        assert_eq!(pic_out[0].pts(ClockBase::Sys), Some(offset));
        assert_eq!(sound_out[0].pts(ClockBase::Sys), Some(offset + 500));
        // Program timestamps stay alongside.
        assert_eq!(pic_out[0].pts(ClockBase::Prog), Some(1000));
        assert_eq!(pic_out[0].rate(), Some(Rational::ONE));
    }

    #[test]
    fn rate_change_reanchors_and_scales() {
        let h = harness();
        h.pic.input(dated_record(&h.mgr, 1000), None);
        h.sound.input(dated_record(&h.mgr, 1500), None);
        h.pic_sink.take();
        h.sound_sink.take();

        h.clock.set(50_000);
        set_rate(h.trickp.as_ref(), Rational::new(1, 2)).unwrap();
        assert_eq!(get_rate(h.trickp.as_ref()).unwrap(), Rational::new(1, 2));

        // Both tracks must queue again before the new anchor is computed.
        h.pic.input(dated_record(&h.mgr, 2000), None);
        assert!(h.pic_sink.is_empty());
        h.sound.input(dated_record(&h.mgr, 2000), None);

        let offset = 50_000 + PTS_DELAY;
        let first = h.pic_sink.take_data();
        assert_eq!(first[0].rate(), Some(Rational::new(1, 2)));
        assert_eq!(first[0].pts(ClockBase::Sys), Some(offset));

        // Half rate doubles the timeline: +1000 prog is +2000 sys.
        h.pic.input(dated_record(&h.mgr, 3000), None);
        let second = h.pic_sink.take_data();
        assert_eq!(second[0].pts(ClockBase::Sys), Some(offset + 2000));
    }

    #[test]
    fn pause_holds_records_and_blocks_the_pump() {
        let h = harness();
        set_rate(h.trickp.as_ref(), Rational::new(0, 1)).unwrap();

        let pump = ManualPump::new();
        let pump_ref: PumpRef = pump.clone();
        h.pic.input(dated_record(&h.mgr, 1000), Some(&pump_ref));
        assert!(h.pic_sink.is_empty());
        assert!(pump.is_blocked());

        h.sound.input(dated_record(&h.mgr, 1200), None);
        set_rate(h.trickp.as_ref(), Rational::ONE).unwrap();
        assert_eq!(h.pic_sink.take_data().len(), 1);
        assert_eq!(h.sound_sink.take_data().len(), 1);
        assert!(!pump.is_blocked(), "resuming playback unblocks the pump");
    }

    #[test]
    fn timestamps_in_the_past_are_clamped_monotonic() {
        let h = harness();
        h.pic.input(dated_record(&h.mgr, 1000), None);
        h.sound.input(dated_record(&h.mgr, 1000), None);
        h.pic_sink.take();

        // Earlier than ts_origin: clamped to the origin.
        h.pic.input(dated_record(&h.mgr, 400), None);
        let out = h.pic_sink.take_data();
        assert_eq!(out[0].pts(ClockBase::Sys), Some(10_000 + PTS_DELAY));

        let mut last = 0;
        for pts in [400, 1000, 1400, 2000] {
            h.pic.input(dated_record(&h.mgr, pts), None);
            let sys = h.pic_sink.take_data()[0].pts(ClockBase::Sys).unwrap();
            assert!(sys >= last, "sys timestamps must not go backwards");
            last = sys;
        }
    }

    #[test]
    fn non_dated_records_are_dropped_during_start() {
        let h = harness();
        h.pic.input(block_record(&h.mgr, &[0], false), None);
        h.pic.input(dated_record(&h.mgr, 1000), None);
        h.sound.input(dated_record(&h.mgr, 1000), None);

        // The undated leader was dropped, the dated records flowed.
        assert_eq!(h.pic_sink.take_data().len(), 1);
        assert_eq!(h.sound_sink.take_data().len(), 1);
    }

    #[test]
    fn subpicture_tracks_do_not_gate_start() {
        let h = harness();
        let sub_mgr = h.trickp.sub_mgr();
        let subpic = sub_mgr
            .alloc(ProbeChain::new(), AllocArg::FlowDef(Uref::flow_def("pic.sub.")))
            .unwrap();
        let subpic_sink = CaptureSink::new();
        pipe::set_output(&*subpic, Some(subpic_sink.clone())).unwrap();

        // Start happens with the subpicture queue empty.
        h.pic.input(dated_record(&h.mgr, 1000), None);
        h.sound.input(dated_record(&h.mgr, 1000), None);
        assert_eq!(h.pic_sink.take_data().len(), 1);

        // Subpicture records flow once started.
        subpic.input(dated_record(&h.mgr, 1100), None);
        assert_eq!(subpic_sink.take_data().len(), 1);
        assert_eq!(pipe::iterate_subs(h.trickp.as_ref()).unwrap().len(), 3);
    }

    #[test]
    fn need_clock_is_answered_by_a_probe_or_the_record_is_dropped() {
        let clock = ManualClock::new(0);
        let trickp = TrickPlayMgr::alloc_trick_play(ProbeChain::new()).unwrap();
        let sub_mgr = trickp.sub_mgr();

        // Without a probe, records fed before a clock is attached die.
        let probe = RecordingProbe::new();
        let bare = sub_mgr
            .alloc(
                ProbeChain::new().with(probe.clone()),
                AllocArg::FlowDef(Uref::flow_def("sound.")),
            )
            .unwrap();
        let mgr = test_block_mgr();
        bare.input(dated_record(&mgr, 10), None);
        assert_eq!(probe.count("need-clock"), 1);

        // With a clock injector, the throw is answered on the spot.
        let injected = sub_mgr
            .alloc(
                ProbeChain::new().with(Rc::new(ClockProbe::new(clock))),
                AllocArg::FlowDef(Uref::flow_def("pic.")),
            )
            .unwrap();
        let sink = CaptureSink::new();
        pipe::set_output(&*injected, Some(sink.clone())).unwrap();
        injected.input(dated_record(&mgr, 10), None);
        injected.input(dated_record(&mgr, 20), None);
        // Only the pic track is non-subpic... the bare sound sub also
        // gates start, so nothing flows yet; the held queue grows instead.
        assert!(sink.is_empty());
    }

    #[test]
    fn flow_definition_precedes_data_on_each_track() {
        let h = harness();
        h.pic.input(dated_record(&h.mgr, 1000), None);
        h.sound.input(dated_record(&h.mgr, 1000), None);

        let all = h.pic_sink.take();
        assert!(all[0].is_flow_def());
        assert!(all[0].match_flow_def("pic."));
        assert!(!all[1].is_flow_def());
    }
}
