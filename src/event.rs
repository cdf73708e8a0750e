//! In-band stream control signals.
//!
//! Events travel through the same ordered path as buffers. Most events are
//! *synchronous*: their position relative to surrounding buffers matters, so
//! a pull input with queued data stores them in order. *Asynchronous* events
//! skip the queue and are handled as soon as they arrive.

use bytes::Bytes;
use std::fmt;

/// How an event is ordered relative to buffered data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    /// Delivered in order with buffers.
    Sync,
    /// Delivered immediately, jumping any queued data.
    Async,
}

/// An in-band control signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// First signal on a stream; precedes all buffers.
    StartOfStream,
    /// Last signal on a stream; no buffers may follow.
    EndOfStream,
    /// A gap in the stream; downstream should reset timing expectations.
    Discontinuity,
    /// A user-defined signal.
    Custom {
        /// Event name.
        name: String,
        /// Opaque payload.
        payload: Bytes,
        /// Ordering mode chosen by the producer.
        mode: EventMode,
    },
}

impl Event {
    /// Create a synchronous custom event.
    pub fn custom(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::Custom {
            name: name.into(),
            payload: payload.into(),
            mode: EventMode::Sync,
        }
    }

    /// Create an asynchronous custom event.
    pub fn custom_async(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::Custom {
            name: name.into(),
            payload: payload.into(),
            mode: EventMode::Async,
        }
    }

    /// The event's ordering mode.
    pub fn mode(&self) -> EventMode {
        match self {
            Self::StartOfStream | Self::EndOfStream | Self::Discontinuity => EventMode::Sync,
            Self::Custom { mode, .. } => *mode,
        }
    }

    /// Whether this is the start-of-stream marker.
    pub fn is_start_of_stream(&self) -> bool {
        matches!(self, Self::StartOfStream)
    }

    /// Whether this is the end-of-stream marker.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartOfStream => f.write_str("start-of-stream"),
            Self::EndOfStream => f.write_str("end-of-stream"),
            Self::Discontinuity => f.write_str("discontinuity"),
            Self::Custom { name, payload, .. } => {
                write!(f, "custom '{}' ({} bytes)", name, payload.len())
            }
        }
    }
}
