// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for Rivulet.
//!
//! Every fallible public function in the runtime returns one of these kinds.
//! The set is deliberately small: a stage either ran out of memory, was handed
//! something malformed, did not recognize a control command, tripped over a
//! foreign library, lost its event loop, or found a resource momentarily
//! locked.

use thiserror::Error;

/// Main error type for Rivulet operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A heap or pool allocation was refused.
    ///
    /// Examples:
    /// - A memory pool hit its outstanding-block limit
    /// - A buffer manager could not obtain backing storage
    #[error("out of memory")]
    OutOfMemory,

    /// Malformed input, an unknown plane, or a flow definition the stage
    /// cannot accept.
    #[error("invalid: {0}")]
    Invalid(String),

    /// The control command is not recognized by this stage.
    ///
    /// This is a normal outcome of generic control dispatch, not a failure
    /// of the pipeline.
    #[error("unhandled control command")]
    Unhandled,

    /// A foreign library reported a failure.
    #[error("external library error: {0}")]
    External(String),

    /// The event-loop adapter failed to allocate or drive a pump.
    #[error("event loop error: {0}")]
    Pump(String),

    /// Exclusive access is currently held elsewhere (deal contention, or a
    /// map requested while a conflicting map is live).
    #[error("resource busy")]
    Busy,
}

/// Convenience type alias for Results using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::Invalid`] with a formatted message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::OutOfMemory.to_string(), "out of memory");
        assert_eq!(
            Error::invalid("bad flow definition").to_string(),
            "invalid: bad flow definition"
        );
        assert_eq!(Error::Busy.to_string(), "resource busy");
    }
}
