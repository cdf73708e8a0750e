//! Actions: how callbacks change the world.
//!
//! A callback never touches runtime state directly; it returns a list of
//! [`Action`]s which the runtime validates against the callback they came
//! from and then performs, in order, after the callback has returned. The
//! permission table is the safety net that keeps, say, a pad-removed
//! callback from emitting buffers.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockRef;
use crate::element::behavior::Actions;
use crate::element::runtime::Core;
use crate::element::timer::TimerId;
use crate::element::PlaybackState;
use crate::error::{Error, Result, StreamProtocolKind};
use crate::event::Event;
use crate::message::{Message, ParentMessage};
use crate::pad::{PadMode, PadRef};
use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Something a filter forwards verbatim to all of its output pads.
#[derive(Debug, Clone)]
pub enum ForwardItem {
    /// Forward an event.
    Event(Event),
    /// Forward caps.
    Caps(Caps),
}

/// A single instruction returned from a behavior callback.
pub enum Action {
    /// Send a batch of buffers out of an output pad.
    Buffer {
        /// The output pad.
        pad: PadRef,
        /// The batch, in order.
        buffers: Vec<Buffer>,
    },
    /// Send caps out of an output pad.
    Caps {
        /// The output pad.
        pad: PadRef,
        /// The caps; must satisfy the pad's own accepted caps.
        caps: Caps,
    },
    /// Send an event out of an output pad.
    Event {
        /// The output pad.
        pad: PadRef,
        /// The event.
        event: Event,
    },
    /// Request data from the queue behind one of the element's own pull
    /// input pads (sinks and manual filters).
    Demand {
        /// The pull input pad.
        pad: PadRef,
        /// How much, in the pad's demand unit.
        size: u64,
    },
    /// Re-enter `handle_demand` for an output pad once the current action
    /// list has been performed, if its demand is still positive.
    Redemand {
        /// The output pad.
        pad: PadRef,
    },
    /// Forward an event or caps to every output pad.
    Forward(ForwardItem),
    /// Send an opaque notification to the parent.
    Notify(Box<dyn Any + Send>),
    /// Start a periodic timer.
    StartTimer {
        /// Timer id, unique within the element.
        id: TimerId,
        /// Nominal tick interval.
        interval: Duration,
        /// Clock scaling the interval; `None` uses the element's clock,
        /// or wall-clock time if it has none.
        clock: Option<ClockRef>,
    },
    /// Stop a previously started timer.
    StopTimer {
        /// The timer to stop.
        id: TimerId,
    },
    /// Mark an output pad's stream as finished.
    EndOfStream {
        /// The output pad.
        pad: PadRef,
    },
}

impl Action {
    /// Convenience: send a single buffer.
    pub fn buffer(pad: PadRef, buffer: Buffer) -> Self {
        Self::Buffer {
            pad,
            buffers: vec![buffer],
        }
    }

    /// Short name of the action kind, for errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer { .. } => "buffer",
            Self::Caps { .. } => "caps",
            Self::Event { .. } => "event",
            Self::Demand { .. } => "demand",
            Self::Redemand { .. } => "redemand",
            Self::Forward(_) => "forward",
            Self::Notify(_) => "notify",
            Self::StartTimer { .. } => "start_timer",
            Self::StopTimer { .. } => "stop_timer",
            Self::EndOfStream { .. } => "end_of_stream",
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Which callback an action list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackKind {
    StoppedToPrepared,
    PreparedToPlaying,
    PlayingToPrepared,
    PreparedToStopped,
    PadAdded,
    PadRemoved,
    Demand,
    Process,
    Write,
    Caps,
    Event,
    Tick,
    Other,
}

impl CallbackKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::StoppedToPrepared => "handle_stopped_to_prepared",
            Self::PreparedToPlaying => "handle_prepared_to_playing",
            Self::PlayingToPrepared => "handle_playing_to_prepared",
            Self::PreparedToStopped => "handle_prepared_to_stopped",
            Self::PadAdded => "handle_pad_added",
            Self::PadRemoved => "handle_pad_removed",
            Self::Demand => "handle_demand",
            Self::Process => "handle_process",
            Self::Write => "handle_write",
            Self::Caps => "handle_caps",
            Self::Event => "handle_event",
            Self::Tick => "handle_tick",
            Self::Other => "handle_other",
        }
    }
}

/// The permission table: which actions a given callback may return.
fn permitted(callback: CallbackKind, action: &Action) -> bool {
    use CallbackKind::*;
    match action {
        // Emitting stream data is off limits while pads are being
        // added/removed; everything else may produce.
        Action::Buffer { .. } | Action::EndOfStream { .. } | Action::Redemand { .. } => {
            !matches!(callback, PadAdded | PadRemoved)
        }
        // Forwarding echoes an incoming item, so it only makes sense from
        // the callbacks that receive one.
        Action::Forward(_) => matches!(callback, Process | Write | Caps | Event | Other),
        _ => true,
    }
}

impl Core {
    /// Validate and perform a callback's actions, in order.
    pub(crate) fn process_actions(
        &mut self,
        callback: CallbackKind,
        actions: Actions,
    ) -> Result<()> {
        for action in actions {
            if !permitted(callback, &action) {
                return Err(Error::InvalidAction {
                    action: action.kind(),
                    callback: callback.name(),
                });
            }
            self.execute_action(callback, action)?;
        }
        Ok(())
    }

    fn execute_action(&mut self, callback: CallbackKind, action: Action) -> Result<()> {
        match action {
            Action::Buffer { pad, buffers } => {
                if self.playback.effective() != PlaybackState::Playing {
                    return Err(Error::InvalidAction {
                        action: "buffer",
                        callback: callback.name(),
                    });
                }
                self.send_buffers(&pad, buffers)
            }
            Action::Caps { pad, caps } => self.send_caps(&pad, caps),
            Action::Event { pad, event } => self.send_event(&pad, event),
            Action::EndOfStream { pad } => self.send_event(&pad, Event::EndOfStream),
            Action::Demand { pad, size } => {
                let data = self.pads.get_mut(&pad)?;
                if !data.is_input() || data.mode != PadMode::Pull || data.auto_demand {
                    return Err(Error::InvalidAction {
                        action: "demand",
                        callback: callback.name(),
                    });
                }
                data.demand += size as i64;
                self.supply_self_demand(&pad)
            }
            Action::Redemand { pad } => {
                self.pending_redemands.push_back(pad);
                Ok(())
            }
            Action::Forward(item) => {
                for output in self.pads.output_refs() {
                    match &item {
                        ForwardItem::Event(event) => self.send_event(&output, event.clone())?,
                        ForwardItem::Caps(caps) => self.send_caps(&output, *caps)?,
                    }
                }
                Ok(())
            }
            Action::Notify(payload) => {
                self.parent.send(ParentMessage::Notification {
                    element: self.name.clone(),
                    payload,
                });
                Ok(())
            }
            Action::StartTimer {
                id,
                interval,
                clock,
            } => {
                let clock = clock.or_else(|| self.clock.clone());
                self.timers.start(id, interval, clock, &self.address)
            }
            Action::StopTimer { id } => self.timers.stop(id),
        }
    }

    /// Push a batch out of an output pad, charging its demand counter and
    /// implicitly opening the stream on first send.
    fn send_buffers(&mut self, pad: &PadRef, buffers: Vec<Buffer>) -> Result<()> {
        let data = self.pads.get_mut(pad)?;
        if !data.is_output() {
            return Err(Error::InvalidMessage {
                message: "buffer",
                pad: pad.clone(),
                mode: data.mode.as_str(),
            });
        }
        if data.end_of_stream {
            return Err(Error::StreamProtocol {
                pad: pad.clone(),
                kind: StreamProtocolKind::BufferAfterEos,
            });
        }
        let Some(peer) = data.peer.clone() else {
            return Err(Error::link(format!("pad {pad} is not linked")));
        };
        if !data.start_of_stream {
            data.start_of_stream = true;
            let _ = peer.element.send(Message::Event {
                pad: peer.pad.clone(),
                event: Event::StartOfStream,
            });
        }
        // Demand is counted in the unit the downstream input declared.
        let unit = data.other_demand_unit.unwrap_or(data.demand_unit);
        data.demand -= unit.count(&buffers) as i64;
        if peer
            .element
            .send(Message::Buffer {
                pad: peer.pad,
                buffers,
            })
            .is_err()
        {
            tracing::warn!(
                element = %self.name,
                pad = %pad,
                "downstream element terminated; buffers dropped"
            );
        }
        Ok(())
    }

    fn send_event(&mut self, pad: &PadRef, event: Event) -> Result<()> {
        let data = self.pads.get_mut(pad)?;
        if !data.is_output() {
            return Err(Error::InvalidMessage {
                message: "event",
                pad: pad.clone(),
                mode: data.mode.as_str(),
            });
        }
        let Some(peer) = data.peer.clone() else {
            return Err(Error::link(format!("pad {pad} is not linked")));
        };
        match &event {
            Event::StartOfStream => {
                if data.start_of_stream {
                    return Err(Error::StreamProtocol {
                        pad: pad.clone(),
                        kind: StreamProtocolKind::SosAlreadyReceived,
                    });
                }
                data.start_of_stream = true;
            }
            Event::EndOfStream => {
                if data.end_of_stream {
                    return Err(Error::StreamProtocol {
                        pad: pad.clone(),
                        kind: StreamProtocolKind::EosAlreadyReceived,
                    });
                }
                if !data.start_of_stream {
                    // A stream that ends before producing anything still
                    // opens first, keeping the flag order invariant.
                    data.start_of_stream = true;
                    let _ = peer.element.send(Message::Event {
                        pad: peer.pad.clone(),
                        event: Event::StartOfStream,
                    });
                }
                data.end_of_stream = true;
            }
            _ => {}
        }
        let _ = peer.element.send(Message::Event {
            pad: peer.pad,
            event,
        });
        Ok(())
    }

    fn send_caps(&mut self, pad: &PadRef, caps: Caps) -> Result<()> {
        let data = self.pads.get_mut(pad)?;
        if !data.is_output() {
            return Err(Error::InvalidMessage {
                message: "caps",
                pad: pad.clone(),
                mode: data.mode.as_str(),
            });
        }
        if !data.accepted_caps.accepts(&caps) {
            return Err(Error::InvalidCaps {
                pad: pad.clone(),
                got: caps.to_string(),
                expected: data.accepted_caps.to_string(),
            });
        }
        let Some(peer) = data.peer.clone() else {
            return Err(Error::link(format!("pad {pad} is not linked")));
        };
        data.caps = Some(caps);
        let _ = peer.element.send(Message::Caps {
            pad: peer.pad,
            caps,
        });
        Ok(())
    }
}
