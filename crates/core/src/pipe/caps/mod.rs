// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Composable stage capabilities.
//!
//! Cross-cutting features stages keep re-growing — an output with flow
//! definition replay, a queue of deferred records, a subpipe registry, a
//! sync flag, exclusive access to a foreign library — are small structs of
//! state plus a narrow set of operations. A stage embeds the ones it opts
//! into; there is no inheritance and no base class, just composition plus
//! the `Pipe` trait.

pub mod deal;
pub mod output;
pub mod sink;
pub mod subs;
pub mod sync;

pub use deal::{Deal, DealPump};
pub use output::OutputCap;
pub use sink::SinkCap;
pub use subs::SubsCap;
pub use sync::SyncCap;
