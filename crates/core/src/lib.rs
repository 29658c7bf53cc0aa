// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Rivulet Core - The pipe-and-buffer runtime for media pipelines.
//!
//! Rivulet assembles directed graphs of processing stages ("pipes") through
//! which time-stamped records flow from sources to sinks, cooperating with
//! an external event loop on a single thread.
//!
//! ## Core Modules
//!
//! - [`mem`]: fixed-depth pooling of raw memory blocks
//! - [`buffer`]: reference-counted payloads (block, picture, sound)
//! - [`dict`]: typed attribute dictionary
//! - [`record`]: the record (`Uref`) flowing between stages, with flow and
//!   clock attribute families
//! - [`pump`]: adapter traits over an external event loop
//! - [`clock`]: 27 MHz clock sources
//! - [`probe`]: chainable event filters attached to each stage
//! - [`pipe`]: the stage trait, managers, and capability helpers
//! - [`control`]: typed control commands
//! - [`error`]: error kinds and the crate `Result`
//!
//! ## Quick Start
//!
//! ```ignore
//! use rivulet_core::pipe::{self, AllocArg, PipeManager};
//! use rivulet_core::probe::{LogProbe, ProbeChain};
//! use rivulet_core::record::Uref;
//! use std::rc::Rc;
//!
//! let probes = ProbeChain::new().with(Rc::new(LogProbe));
//! let stage = my_stage_mgr.alloc(probes, AllocArg::None)?;
//! pipe::set_flow_def(&*stage, Uref::flow_def("block.mpegtspsi."))?;
//! pipe::set_output(&*stage, Some(sink))?;
//! stage.input(record, None);
//! ```

// Module declarations
pub mod buffer;
pub mod clock;
pub mod control;
pub mod dict;
pub mod error;
pub mod mem;
pub mod pipe;
pub mod probe;
pub mod pump;
pub mod rational;
pub mod record;

// Convenience re-exports for commonly used types
// These are the most frequently used types in stage implementations

// Error handling
pub use error::{Error, Result};

// Records and payloads
pub use buffer::{BlockMgr, PicMgr, SoundMgr, Ubuf, UbufMgr};
pub use mem::UmemPool;
pub use record::{ClockBase, DateKind, Uref};

// Stage abstractions
pub use control::{Control, ControlReply, StageControl};
pub use pipe::{AllocArg, Pipe, PipeCore, PipeManager, PipeRef, Signature};
pub use probe::{Event, Probe, ProbeChain, ProbeResult};

// Environment handles
pub use clock::{ClockRef, Uclock, UCLOCK_FREQ};
pub use pump::{Pump, PumpCallback, PumpManager, PumpMgrRef, PumpRef};
pub use rational::Rational;
