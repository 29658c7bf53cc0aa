// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Flow attributes: the definition string, stream flags and the schema
//! attributes carried by flow-definition records.
//!
//! Definition strings form a dotted hierarchy ("block.", "pic.", "pic.sub.",
//! "sound.", "block.mpegtspsi.", codec-qualified refinements like
//! "block.mpeg2video.pic."); matching is prefix equality.

use crate::dict::{Key, Namespace, Value};
use crate::rational::Rational;
use crate::record::Uref;

const DEF: Key = Key::new(Namespace::Flow, "def");
const DISCONTINUITY: Key = Key::new(Namespace::Flow, "disc");
const RANDOM: Key = Key::new(Namespace::Flow, "random");
const SOS: Key = Key::new(Namespace::Flow, "sos");
const HEADERS: Key = Key::new(Namespace::Flow, "headers");
const LATENCY: Key = Key::new(Namespace::Flow, "latency");

const PIC_HSIZE: Key = Key::new(Namespace::Pic, "hsize");
const PIC_VSIZE: Key = Key::new(Namespace::Pic, "vsize");
const PIC_FPS: Key = Key::new(Namespace::Pic, "fps");
const PIC_SAR: Key = Key::new(Namespace::Pic, "sar");

const SOUND_RATE: Key = Key::new(Namespace::Sound, "rate");
const SOUND_CHANNELS: Key = Key::new(Namespace::Sound, "channels");

impl Uref {
    // --- definition string ---

    pub fn def(&self) -> Option<String> {
        self.dict().string(DEF).ok().flatten()
    }

    pub fn set_flow_def(&mut self, def: &str) {
        self.dict_mut().set(DEF, Value::String(def.to_owned()));
    }

    /// Prefix match against the definition string.
    pub fn match_flow_def(&self, prefix: &str) -> bool {
        self.def().is_some_and(|def| def.starts_with(prefix))
    }

    /// True for flow-definition records: a definition string and no payload.
    pub fn is_flow_def(&self) -> bool {
        self.ubuf().is_none() && self.dict().get(DEF).is_some()
    }

    // --- stream flags ---

    /// Marks a break in the stream (preceding data was lost).
    pub fn set_discontinuity(&mut self) {
        self.dict_mut().set_void(DISCONTINUITY);
    }

    pub fn has_discontinuity(&self) -> bool {
        self.dict().has_void(DISCONTINUITY)
    }

    pub fn clear_discontinuity(&mut self) {
        self.dict_mut().delete(DISCONTINUITY);
    }

    /// Marks a random access point (consumers may start decoding here).
    pub fn set_random(&mut self) {
        self.dict_mut().set_void(RANDOM);
    }

    pub fn has_random(&self) -> bool {
        self.dict().has_void(RANDOM)
    }

    /// Marks the very first record of a stream.
    pub fn set_sos(&mut self) {
        self.dict_mut().set_void(SOS);
    }

    pub fn has_sos(&self) -> bool {
        self.dict().has_void(SOS)
    }

    // --- flow-definition schema ---

    /// Codec extradata handed to decoders before any payload.
    pub fn headers(&self) -> Option<Vec<u8>> {
        self.dict().opaque(HEADERS).ok().flatten()
    }

    pub fn set_headers(&mut self, headers: &[u8]) {
        self.dict_mut().set(HEADERS, Value::Opaque(headers.to_vec()));
    }

    /// Upstream latency in 27 MHz ticks.
    pub fn latency(&self) -> Option<u64> {
        self.dict().unsigned(LATENCY).ok().flatten()
    }

    pub fn set_latency(&mut self, latency: u64) {
        self.dict_mut().set(LATENCY, Value::Unsigned(latency));
    }

    pub fn pic_hsize(&self) -> Option<u64> {
        self.dict().unsigned(PIC_HSIZE).ok().flatten()
    }

    pub fn set_pic_hsize(&mut self, hsize: u64) {
        self.dict_mut().set(PIC_HSIZE, Value::Unsigned(hsize));
    }

    pub fn pic_vsize(&self) -> Option<u64> {
        self.dict().unsigned(PIC_VSIZE).ok().flatten()
    }

    pub fn set_pic_vsize(&mut self, vsize: u64) {
        self.dict_mut().set(PIC_VSIZE, Value::Unsigned(vsize));
    }

    pub fn pic_fps(&self) -> Option<Rational> {
        self.dict().rational(PIC_FPS).ok().flatten()
    }

    pub fn set_pic_fps(&mut self, fps: Rational) {
        self.dict_mut().set(PIC_FPS, Value::Rational(fps));
    }

    /// Sample aspect ratio.
    pub fn pic_sar(&self) -> Option<Rational> {
        self.dict().rational(PIC_SAR).ok().flatten()
    }

    pub fn set_pic_sar(&mut self, sar: Rational) {
        self.dict_mut().set(PIC_SAR, Value::Rational(sar));
    }

    pub fn sound_rate(&self) -> Option<u64> {
        self.dict().unsigned(SOUND_RATE).ok().flatten()
    }

    pub fn set_sound_rate(&mut self, rate: u64) {
        self.dict_mut().set(SOUND_RATE, Value::Unsigned(rate));
    }

    pub fn sound_channels(&self) -> Option<u64> {
        self.dict().unsigned(SOUND_CHANNELS).ok().flatten()
    }

    pub fn set_sound_channels(&mut self, channels: u64) {
        self.dict_mut().set(SOUND_CHANNELS, Value::Unsigned(channels));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching() {
        let flow = Uref::flow_def("block.mpeg2video.pic.");
        assert!(flow.match_flow_def("block."));
        assert!(flow.match_flow_def("block.mpeg2video."));
        assert!(!flow.match_flow_def("pic."));
        assert!(!Uref::new().match_flow_def("block."));
    }

    #[test]
    fn schema_round_trip() {
        let mut flow = Uref::flow_def("pic.");
        flow.set_pic_hsize(1920);
        flow.set_pic_vsize(1080);
        flow.set_pic_fps(Rational::new(30_000, 1001));
        flow.set_headers(&[0, 0, 1]);
        flow.set_latency(27_000_000 / 25);

        assert_eq!(flow.pic_hsize(), Some(1920));
        assert_eq!(flow.pic_vsize(), Some(1080));
        assert_eq!(flow.pic_fps(), Some(Rational::new(30_000, 1001)));
        assert_eq!(flow.headers().unwrap(), vec![0, 0, 1]);
        assert_eq!(flow.latency(), Some(1_080_000));
    }
}
