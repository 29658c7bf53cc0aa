// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Time coordinates on records.
//!
//! Up to three timelines coexist on a record: *orig* (as decoded from the
//! wire), *prog* (program timeline) and *sys* (local system time). Each
//! timeline stores a single date tagged with its kind — clock reference,
//! decoding timestamp or presentation timestamp — plus two shared deltas
//! (`dts - cr` and `pts - dts`) from which the other stamps of the same
//! timeline are derived. All values count 27 MHz ticks.
//!
//! The inline representation mirrors how scheduling stages use the data:
//! every record passing a clock-aware stage touches these fields, so they
//! do not round-trip through the dictionary.

use crate::dict::{Key, Namespace};
use crate::error::{Error, Result};
use crate::rational::Rational;
use crate::record::Uref;

const RATE: Key = Key::new(Namespace::Clock, "rate");
const RAP: Key = Key::new(Namespace::Clock, "rap");
const DURATION: Key = Key::new(Namespace::Clock, "duration");

/// Which timeline a date lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockBase {
    Sys,
    Prog,
    Orig,
}

/// What kind of stamp the stored date is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateKind {
    /// Clock reference (arrival time of the unit).
    Cr,
    /// Decoding timestamp.
    Dts,
    /// Presentation timestamp.
    Pts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Date {
    value: u64,
    kind: DateKind,
}

/// Inline clock state of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ClockDates {
    sys: Option<Date>,
    prog: Option<Date>,
    orig: Option<Date>,
    dts_pts_delay: Option<u64>,
    cr_dts_delay: Option<u64>,
}

impl ClockDates {
    fn slot(&self, base: ClockBase) -> Option<Date> {
        match base {
            ClockBase::Sys => self.sys,
            ClockBase::Prog => self.prog,
            ClockBase::Orig => self.orig,
        }
    }

    fn slot_mut(&mut self, base: ClockBase) -> &mut Option<Date> {
        match base {
            ClockBase::Sys => &mut self.sys,
            ClockBase::Prog => &mut self.prog,
            ClockBase::Orig => &mut self.orig,
        }
    }
}

impl Uref {
    /// Raw date on a timeline, with its kind.
    pub fn date(&self, base: ClockBase) -> Option<(u64, DateKind)> {
        self.dates.slot(base).map(|d| (d.value, d.kind))
    }

    /// Stores a raw date, replacing whatever the timeline held.
    pub fn set_date(&mut self, base: ClockBase, value: u64, kind: DateKind) {
        *self.dates.slot_mut(base) = Some(Date { value, kind });
    }

    pub fn delete_date(&mut self, base: ClockBase) {
        *self.dates.slot_mut(base) = None;
    }

    /// The `pts - dts` delta shared by all timelines.
    pub fn dts_pts_delay(&self) -> Option<u64> {
        self.dates.dts_pts_delay
    }

    pub fn set_dts_pts_delay(&mut self, delay: u64) {
        self.dates.dts_pts_delay = Some(delay);
    }

    /// The `dts - cr` delta shared by all timelines.
    pub fn cr_dts_delay(&self) -> Option<u64> {
        self.dates.cr_dts_delay
    }

    pub fn set_cr_dts_delay(&mut self, delay: u64) {
        self.dates.cr_dts_delay = Some(delay);
    }

    /// Derives the clock reference on a timeline.
    pub fn cr(&self, base: ClockBase) -> Option<u64> {
        let date = self.dates.slot(base)?;
        match date.kind {
            DateKind::Cr => Some(date.value),
            DateKind::Dts => date.value.checked_sub(self.dates.cr_dts_delay?),
            DateKind::Pts => date
                .value
                .checked_sub(self.dates.dts_pts_delay?)?
                .checked_sub(self.dates.cr_dts_delay?),
        }
    }

    /// Derives the decoding timestamp on a timeline.
    pub fn dts(&self, base: ClockBase) -> Option<u64> {
        let date = self.dates.slot(base)?;
        match date.kind {
            DateKind::Cr => Some(date.value + self.dates.cr_dts_delay?),
            DateKind::Dts => Some(date.value),
            DateKind::Pts => date.value.checked_sub(self.dates.dts_pts_delay?),
        }
    }

    /// Derives the presentation timestamp on a timeline.
    pub fn pts(&self, base: ClockBase) -> Option<u64> {
        let date = self.dates.slot(base)?;
        match date.kind {
            DateKind::Cr => Some(date.value + self.dates.cr_dts_delay? + self.dates.dts_pts_delay?),
            DateKind::Dts => Some(date.value + self.dates.dts_pts_delay?),
            DateKind::Pts => Some(date.value),
        }
    }

    /// Sets the presentation timestamp on a timeline.
    ///
    /// When the timeline already holds a decoding timestamp the call only
    /// adjusts the shared `pts - dts` delta, keeping one date per timeline.
    pub fn set_pts(&mut self, base: ClockBase, value: u64) {
        match self.dates.slot(base) {
            Some(Date { kind: DateKind::Dts, value: dts }) if value >= dts => {
                self.dates.dts_pts_delay = Some(value - dts);
            },
            Some(Date { kind: DateKind::Cr, value: cr })
                if self.dates.cr_dts_delay.is_some_and(|d| value >= cr + d) =>
            {
                let dts = cr + self.dates.cr_dts_delay.unwrap_or(0);
                self.dates.dts_pts_delay = Some(value - dts);
            },
            _ => *self.dates.slot_mut(base) = Some(Date { value, kind: DateKind::Pts }),
        }
    }

    /// Sets the decoding timestamp on a timeline.
    pub fn set_dts(&mut self, base: ClockBase, value: u64) {
        match self.dates.slot(base) {
            Some(Date { kind: DateKind::Pts, value: pts }) if pts >= value => {
                self.dates.dts_pts_delay = Some(pts - value);
                *self.dates.slot_mut(base) = Some(Date { value, kind: DateKind::Dts });
            },
            Some(Date { kind: DateKind::Cr, value: cr }) if value >= cr => {
                self.dates.cr_dts_delay = Some(value - cr);
            },
            _ => *self.dates.slot_mut(base) = Some(Date { value, kind: DateKind::Dts }),
        }
    }

    /// Sets the clock reference on a timeline.
    pub fn set_cr(&mut self, base: ClockBase, value: u64) {
        match self.dates.slot(base) {
            Some(Date { kind: DateKind::Dts, value: dts }) if dts >= value => {
                self.dates.cr_dts_delay = Some(dts - value);
                *self.dates.slot_mut(base) = Some(Date { value, kind: DateKind::Cr });
            },
            _ => *self.dates.slot_mut(base) = Some(Date { value, kind: DateKind::Cr }),
        }
    }

    /// Re-anchors a timeline on the given stamp kind, derived through the
    /// stored deltas. Returns the derived value.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] when the stamp cannot be derived (no date, or a
    /// needed delta is absent).
    pub fn rebase(&mut self, base: ClockBase, kind: DateKind) -> Result<u64> {
        let value = match kind {
            DateKind::Cr => self.cr(base),
            DateKind::Dts => self.dts(base),
            DateKind::Pts => self.pts(base),
        }
        .ok_or_else(|| Error::invalid("stamp not derivable on this timeline"))?;
        self.set_date(base, value, kind);
        Ok(value)
    }

    // --- dictionary-backed clock attributes ---

    /// Playback rate stamped by trick-play stages.
    pub fn rate(&self) -> Option<Rational> {
        self.dict().rational(RATE).ok().flatten()
    }

    pub fn set_rate(&mut self, rate: Rational) {
        self.dict_mut().set(RATE, crate::dict::Value::Rational(rate));
    }

    /// Random access point index, for consumers seeking keyframes.
    pub fn rap(&self) -> Option<u64> {
        self.dict().unsigned(RAP).ok().flatten()
    }

    pub fn set_rap(&mut self, rap: u64) {
        self.dict_mut().set(RAP, crate::dict::Value::Unsigned(rap));
    }

    /// Duration of the unit, in 27 MHz ticks.
    pub fn duration(&self) -> Option<u64> {
        self.dict().unsigned(DURATION).ok().flatten()
    }

    pub fn set_duration(&mut self, duration: u64) {
        self.dict_mut().set(DURATION, crate::dict::Value::Unsigned(duration));
    }
}
