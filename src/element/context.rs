//! Callback context.
//!
//! A read-only view of the element handed to every behavior callback.
//! Mutation happens exclusively through returned actions, after the
//! callback has returned; the context never aliases mutable runtime state.

use crate::caps::Caps;
use crate::element::PlaybackState;
use crate::pad::{PadData, PadRef, PadsState};

/// What a behavior callback can see of its element.
pub struct Context<'a> {
    name: &'a str,
    playback: PlaybackState,
    pads: &'a PadsState,
}

impl<'a> Context<'a> {
    pub(crate) fn new(name: &'a str, playback: PlaybackState, pads: &'a PadsState) -> Self {
        Self {
            name,
            playback,
            pads,
        }
    }

    /// The element's name.
    pub fn name(&self) -> &str {
        self.name
    }

    /// The playback state the callback runs in.
    pub fn playback_state(&self) -> PlaybackState {
        self.playback
    }

    /// Look up a live pad.
    pub fn pad(&self, pad: &PadRef) -> Option<&PadData> {
        self.pads.get(pad).ok()
    }

    /// The caps last negotiated on a pad, if any.
    pub fn caps(&self, pad: &PadRef) -> Option<&Caps> {
        self.pad(pad).and_then(|data| data.caps.as_ref())
    }

    /// Iterate over all live pads.
    pub fn pads(&self) -> impl Iterator<Item = &PadData> {
        self.pads.iter()
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("playback", &self.playback)
            .finish()
    }
}
