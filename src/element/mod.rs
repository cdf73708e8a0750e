//! Elements and their runtime.
//!
//! An element is a user-supplied unit of stream processing — a source,
//! filter or sink — hosted by a runtime task that owns its pads, queues
//! and lifecycle:
//!
//! - [`ElementBehavior`]: the callback contract user elements implement
//! - [`Action`]: the instructions callbacks return
//! - [`start`] / [`ElementHandle`]: spawning and controlling a runtime
//! - [`PlaybackState`]: the `stopped ↔ prepared ↔ playing` lifecycle
//!
//! # Example
//!
//! ```rust,ignore
//! use weir::element::{start, StartOptions};
//! use weir::message::{monitor, parent_channel};
//!
//! let (parent, reports) = parent_channel();
//! let (_guard, parent_monitor) = monitor();
//! let handle = start(
//!     MySource::new(),
//!     StartOptions::new("source", parent, parent_monitor),
//! )?;
//! handle.change_playback_state(PlaybackState::Playing)?;
//! ```

mod action;
mod behavior;
mod context;
mod demand;
mod playback;
mod runtime;
mod stream;
mod timer;

pub use action::{Action, ForwardItem};
pub use behavior::{no_actions, Actions, CallbackResult, ElementBehavior, ElementType};
pub use context::Context;
pub use playback::PlaybackState;
pub use runtime::{start, ElementHandle, StartOptions};
pub use timer::TimerId;
