// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in processing stages for Rivulet.
//!
//! - [`psi_merge`]: reassembles MPEG-TS PSI sections out of TS payloads
//! - [`trick_play`]: remaps program timestamps to a rate-scaled system
//!   timeline across multiple tracks
//! - [`test_utils`]: capture sinks, manual pumps and record builders shared
//!   by stage tests

pub mod psi_merge;
pub mod test_utils;
pub mod trick_play;

pub use psi_merge::{PsiMerge, PsiMergeMgr, PSI_MERGE_SIGNATURE};
pub use trick_play::{
    TrickPlay, TrickPlayMgr, TrickPlaySub, TrickPlaySubMgr, TRICK_PLAY_SIGNATURE,
    TRICK_PLAY_SUB_SIGNATURE,
};
