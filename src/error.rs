//! Error types for Weir.

use crate::pad::PadRef;
use std::fmt;
use thiserror::Error;

/// Result type alias using Weir's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Weir operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Element failed to start.
    #[error("element failed to initialize: {reason}")]
    Init {
        /// Why initialization failed.
        reason: String,
    },

    /// A message arrived at an entry point where it is not valid.
    #[error("message '{message}' not valid for pad {pad} in {mode} mode")]
    InvalidMessage {
        /// Kind of the offending message.
        message: &'static str,
        /// The pad it arrived on.
        pad: PadRef,
        /// The pad's mode at the time.
        mode: &'static str,
    },

    /// A callback returned an action it is not allowed to return.
    #[error("action '{action}' not permitted in callback '{callback}'")]
    InvalidAction {
        /// Kind of the offending action.
        action: &'static str,
        /// The callback that returned it.
        callback: &'static str,
    },

    /// Incoming caps do not satisfy the pad's accepted caps.
    #[error("caps rejected on pad {pad}: {got} does not satisfy {expected}")]
    InvalidCaps {
        /// The pad the caps arrived on.
        pad: PadRef,
        /// Description of the rejected caps.
        got: String,
        /// Description of the accepted caps spec.
        expected: String,
    },

    /// Linking two pads failed.
    #[error("link failed: {reason}")]
    Link {
        /// Why the link was rejected.
        reason: String,
    },

    /// A push producer overran a pull consumer past its fail level.
    #[error("toilet overflow on pad {pad}: size {size} reached fail level {fail}")]
    ToiletOverflow {
        /// The overrun input pad.
        pad: PadRef,
        /// Queue size at the moment of overflow.
        size: u64,
        /// The configured fail level.
        fail: u64,
    },

    /// Stream control signals arrived out of protocol order.
    #[error("stream protocol violation on pad {pad}: {kind}")]
    StreamProtocol {
        /// The pad the violation occurred on.
        pad: PadRef,
        /// What was violated.
        kind: StreamProtocolKind,
    },

    /// A timer operation failed.
    #[error("timer {id}: {kind}")]
    Timer {
        /// What went wrong.
        kind: TimerErrorKind,
        /// The timer in question.
        id: u64,
    },

    /// A sync-barrier operation is forbidden in its current activity state.
    #[error("operation not allowed in the barrier's current activity state")]
    BadActivityRequest,

    /// The element's parent terminated.
    #[error("parent terminated: {reason}")]
    ParentCrash {
        /// Termination reason as observed by the monitor.
        reason: String,
    },

    /// A user callback reported a failure.
    #[error("callback '{callback}' failed: {reason}")]
    Callback {
        /// The callback that failed.
        callback: &'static str,
        /// The failure it reported.
        reason: String,
    },

    /// The target runtime or barrier has already shut down.
    #[error("peer is terminated")]
    Terminated,
}

impl Error {
    /// Build a callback failure from any displayable reason.
    pub fn callback(callback: &'static str, reason: impl fmt::Display) -> Self {
        Self::Callback {
            callback,
            reason: reason.to_string(),
        }
    }

    /// Build a link failure from any displayable reason.
    pub fn link(reason: impl fmt::Display) -> Self {
        Self::Link {
            reason: reason.to_string(),
        }
    }
}

/// Ways the start/end-of-stream protocol can be violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocolKind {
    /// `StartOfStream` arrived twice.
    SosAlreadyReceived,
    /// `EndOfStream` arrived before `StartOfStream`.
    SosNotReceived,
    /// `EndOfStream` arrived twice.
    EosAlreadyReceived,
    /// A buffer arrived after `EndOfStream`.
    BufferAfterEos,
    /// A stream signal arrived on a pad that cannot carry it.
    WrongDirection,
}

impl fmt::Display for StreamProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SosAlreadyReceived => "start of stream already received",
            Self::SosNotReceived => "start of stream not received",
            Self::EosAlreadyReceived => "end of stream already received",
            Self::BufferAfterEos => "buffer after end of stream",
            Self::WrongDirection => "stream signal on wrong pad direction",
        };
        f.write_str(s)
    }
}

/// Ways a timer operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerErrorKind {
    /// A timer with this id already exists.
    AlreadyExists,
    /// No timer with this id exists.
    Unknown,
}

impl fmt::Display for TimerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => f.write_str("already exists"),
            Self::Unknown => f.write_str("unknown timer"),
        }
    }
}
