//! # Weir
//!
//! A per-element runtime for streaming pipelines: pluggable processing
//! units ("elements") connected by typed ports ("pads"), with credit-based
//! pull flow control, a playback lifecycle, synchronization barriers and
//! ratio-scaled timers.
//!
//! ## Features
//!
//! - **One task per element**: each element is an isolated concurrency
//!   unit with a single-threaded message loop; interaction is message
//!   passing only
//! - **Credit-based backpressure**: pull pads issue demand upstream, so a
//!   fast producer can never outrun a slow consumer by more than a queue
//! - **Toilet mode**: a push producer feeding a pull consumer gets an
//!   overflow detector instead of silent unbounded buffering
//! - **Deferred data**: data arriving before playback reaches `playing`
//!   replays in order once it does
//! - **Sync barriers**: elements enter playing together, compensated for
//!   their reported latencies
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use weir::prelude::*;
//! use weir::elements::{CountSource, CollectSink};
//!
//! let (parent, _reports) = weir::message::parent_channel();
//! let (_guard, source_monitor) = weir::message::monitor();
//! let (guard2, sink_monitor) = weir::message::monitor();
//!
//! let source = start(CountSource::new(100, 64), StartOptions::new("source", parent.clone(), source_monitor))?;
//! let sink = start(CollectSink::new(10), StartOptions::new("sink", parent, sink_monitor))?;
//!
//! weir::link::link(source.address(), "output", sink.address(), "input").await?;
//! source.change_playback_state(PlaybackState::Playing)?;
//! sink.change_playback_state(PlaybackState::Playing)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod caps;
pub mod clock;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod link;
pub mod message;
pub mod pad;
pub mod sync;
pub mod telemetry;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{Buffer, Metadata};
    pub use crate::caps::{Caps, CapsSpec};
    pub use crate::clock::{Clock, ClockRef, ClockTime, Ratio};
    pub use crate::element::{
        start, Action, CallbackResult, Context, ElementBehavior, ElementHandle, ElementType,
        PlaybackState, StartOptions,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::Event;
    pub use crate::pad::{DemandUnit, PadRef, PadSpec};
    pub use crate::sync::{StreamSync, SyncConfig};
}

pub use error::{Error, Result};
