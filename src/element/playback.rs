//! Playback lifecycle: the three-state machine and the deferred queue.
//!
//! Elements move through `Stopped ↔ Prepared ↔ Playing`, one adjacent step
//! at a time. Data messages that arrive before the element plays are not
//! dropped and not processed early; they wait in the [`PlaybackBuffer`] and
//! replay in arrival order the moment playback reaches `Playing`.

use crate::message::Message;
use std::collections::VecDeque;
use std::fmt;

/// Coarse lifecycle phase of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum PlaybackState {
    /// Inert; resources released.
    #[default]
    Stopped,
    /// Resources acquired, not processing data.
    Prepared,
    /// Processing data.
    Playing,
}

impl PlaybackState {
    /// The next adjacent state on the way to `target`, or `None` when
    /// already there.
    pub fn step_towards(self, target: PlaybackState) -> Option<PlaybackState> {
        use PlaybackState::*;
        match (self, target) {
            (a, b) if a == b => None,
            (Stopped, _) => Some(Prepared),
            (Playing, _) => Some(Prepared),
            (Prepared, Stopped) => Some(Stopped),
            (Prepared, _) => Some(Playing),
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Prepared => f.write_str("prepared"),
            Self::Playing => f.write_str("playing"),
        }
    }
}

/// The element's position in the state machine.
#[derive(Debug, Default)]
pub(crate) struct Playback {
    current: PlaybackState,
    pending: Option<PlaybackState>,
}

impl Playback {
    /// The last fully reached state.
    pub fn current(&self) -> PlaybackState {
        self.current
    }

    /// The state a transition is currently moving into, if any.
    pub fn pending(&self) -> Option<PlaybackState> {
        self.pending
    }

    /// The state callbacks should consider themselves in: the in-flight
    /// target while transitioning, the reached state otherwise.
    pub fn effective(&self) -> PlaybackState {
        self.pending.unwrap_or(self.current)
    }

    pub fn begin(&mut self, next: PlaybackState) {
        self.pending = Some(next);
    }

    pub fn commit(&mut self) {
        if let Some(next) = self.pending.take() {
            self.current = next;
        }
    }

    pub fn abort(&mut self) {
        self.pending = None;
    }
}

/// FIFO of data messages awaiting `Playing`.
#[derive(Debug, Default)]
pub(crate) struct PlaybackBuffer {
    queue: VecDeque<Message>,
}

impl PlaybackBuffer {
    pub fn push(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    /// Pop the oldest deferred message.
    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
