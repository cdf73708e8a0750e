//! Input-side controllers: buffers, events and caps arriving on pads.
//!
//! Everything here runs inside the element task. The ordering rule is
//! simple: anything synchronous that arrives on a pull input with queued
//! data goes *into* the queue, so it reaches the user callbacks in exactly
//! the order the producer emitted it.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::action::CallbackKind;
use crate::element::behavior::ElementType;
use crate::element::runtime::Core;
use crate::element::PlaybackState;
use crate::error::{Error, Result, StreamProtocolKind};
use crate::event::{Event, EventMode};
use crate::pad::{PadMode, PadRef, QueueItem};
use crate::telemetry;

impl Core {
    /// Hot-path shortcut for the overwhelmingly common case: a buffer on a
    /// push input while playing goes straight to the process callback. Any
    /// other shape falls through to the generic path.
    pub(crate) fn try_hot_path(
        &mut self,
        pad: &PadRef,
        buffers: &mut Option<Vec<Buffer>>,
    ) -> Result<bool> {
        if self.playback.current() != PlaybackState::Playing {
            return Ok(false);
        }
        let Ok(data) = self.pads.get(pad) else {
            return Ok(false);
        };
        if !data.is_input() || data.mode != PadMode::Push || data.end_of_stream {
            return Ok(false);
        }
        let buffers = buffers.take().expect("hot path offered without buffers");
        self.dispatch_process(pad, buffers)?;
        Ok(true)
    }

    /// Generic entry point for a buffer message.
    pub(crate) fn handle_incoming_buffers(
        &mut self,
        pad: PadRef,
        buffers: Vec<Buffer>,
    ) -> Result<()> {
        let data = self.pads.get(&pad)?;
        if !data.is_input() {
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
        match (data.mode, data.auto_demand) {
            (PadMode::Push, _) => self.dispatch_process(&pad, buffers),
            (PadMode::Pull, true) => {
                let data = self.pads.get_mut(&pad)?;
                let consumed = data.demand_unit.count(&buffers) as i64;
                data.demand -= consumed;
                self.dispatch_process(&pad, buffers)
            }
            (PadMode::Pull, false) => {
                let element = self.name.clone();
                let data = self.pads.get_mut(&pad)?;
                let Some(queue) = data.buffer.as_mut() else {
                    return Err(Error::link(format!("pad {pad} is not linked")));
                };
                queue.store(QueueItem::Buffers(buffers))?;
                telemetry::record_queue_size(&element, &pad, queue.current_size());
                self.supply_self_demand(&pad)
            }
        }
    }

    /// Feed the element's own pending demand on a pull input from its
    /// queue. No-op while the deferred queue is draining; the drain
    /// finishes with one batched supply pass instead.
    pub(crate) fn supply_self_demand(&mut self, pad: &PadRef) -> Result<()> {
        if self.draining {
            return Ok(());
        }
        let data = self.pads.get_mut(pad)?;
        let wanted = data.demand;
        if wanted <= 0 {
            return Ok(());
        }
        let Some(queue) = data.buffer.as_mut() else {
            return Ok(());
        };
        if queue.has_no_records() {
            return Ok(());
        }
        let outcome = queue.take(wanted as u64);
        let unit = data.demand_unit;
        let supplied: u64 = outcome
            .items()
            .iter()
            .map(|item| match item {
                QueueItem::Buffers(buffers) => unit.count(buffers),
                _ => 0,
            })
            .sum();
        data.demand -= supplied as i64;
        self.dispatch_items(pad, outcome.into_items())
    }

    /// Run a batched supply pass over every self-driven pull input.
    pub(crate) fn supply_all_pending(&mut self) -> Result<()> {
        let pending: Vec<PadRef> = self
            .pads
            .iter()
            .filter(|p| {
                p.is_input() && p.mode == PadMode::Pull && !p.auto_demand && p.demand > 0
            })
            .map(|p| p.pad.clone())
            .collect();
        for pad in pending {
            self.supply_self_demand(&pad)?;
        }
        Ok(())
    }

    /// Deliver items popped from a pull queue, in order.
    pub(crate) fn dispatch_items(&mut self, pad: &PadRef, items: Vec<QueueItem>) -> Result<()> {
        for item in items {
            match item {
                QueueItem::Buffers(buffers) => self.dispatch_process(pad, buffers)?,
                QueueItem::Event(event) => self.exec_event(pad, event)?,
                QueueItem::Caps(caps) => self.exec_caps(pad, caps)?,
            }
        }
        Ok(())
    }

    /// Invoke the process callback matching the element's role.
    pub(crate) fn dispatch_process(&mut self, pad: &PadRef, buffers: Vec<Buffer>) -> Result<()> {
        match self.element_type {
            ElementType::Sink => self.invoke(CallbackKind::Write, |behavior, ctx| {
                behavior.handle_write(pad, buffers, ctx)
            }),
            _ => self.invoke(CallbackKind::Process, |behavior, ctx| {
                behavior.handle_process(pad, buffers, ctx)
            }),
        }
    }

    /// Entry point for an event message.
    pub(crate) fn handle_incoming_event(&mut self, pad: PadRef, event: Event) -> Result<()> {
        let data = self.pads.get_mut(&pad)?;
        // Synchronous events queue behind buffered data; everything else
        // (async events, push pads, empty queues) dispatches immediately.
        if event.mode() == EventMode::Sync && data.is_input() && data.mode == PadMode::Pull {
            if let Some(queue) = data.buffer.as_mut() {
                if !queue.is_empty() {
                    queue.store(QueueItem::Event(event))?;
                    return Ok(());
                }
            }
        }
        self.exec_event(&pad, event)
    }

    /// Actually deliver an event: enforce the stream protocol for the
    /// special markers, then hand it to the user callback.
    pub(crate) fn exec_event(&mut self, pad: &PadRef, event: Event) -> Result<()> {
        match &event {
            Event::StartOfStream => {
                let data = self.pads.get_mut(pad)?;
                if !data.is_input() {
                    return Err(Error::StreamProtocol {
                        pad: pad.clone(),
                        kind: StreamProtocolKind::WrongDirection,
                    });
                }
                if data.start_of_stream {
                    return Err(Error::StreamProtocol {
                        pad: pad.clone(),
                        kind: StreamProtocolKind::SosAlreadyReceived,
                    });
                }
                data.start_of_stream = true;
            }
            Event::EndOfStream => {
                let data = self.pads.get_mut(pad)?;
                if !data.is_input() {
                    return Err(Error::StreamProtocol {
                        pad: pad.clone(),
                        kind: StreamProtocolKind::WrongDirection,
                    });
                }
                if !data.start_of_stream {
                    return Err(Error::StreamProtocol {
                        pad: pad.clone(),
                        kind: StreamProtocolKind::SosNotReceived,
                    });
                }
                if data.end_of_stream {
                    return Err(Error::StreamProtocol {
                        pad: pad.clone(),
                        kind: StreamProtocolKind::EosAlreadyReceived,
                    });
                }
                data.end_of_stream = true;
            }
            _ => {}
        }
        self.invoke(CallbackKind::Event, |behavior, ctx| {
            behavior.handle_event(pad, &event, ctx)
        })
    }

    /// Entry point for a caps message.
    pub(crate) fn handle_incoming_caps(&mut self, pad: PadRef, caps: Caps) -> Result<()> {
        let data = self.pads.get_mut(&pad)?;
        if !data.is_input() {
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
        // Re-negotiation waits until buffered data from the old format has
        // been consumed; the marker keeps the order exact.
        if data.mode == PadMode::Pull {
            if let Some(queue) = data.buffer.as_mut() {
                if !queue.is_empty() {
                    queue.store(QueueItem::Caps(caps))?;
                    return Ok(());
                }
            }
        }
        self.exec_caps(&pad, caps)
    }

    /// Deliver caps: user callback first, then the pad's record updates.
    pub(crate) fn exec_caps(&mut self, pad: &PadRef, caps: Caps) -> Result<()> {
        self.invoke(CallbackKind::Caps, |behavior, ctx| {
            behavior.handle_caps(pad, &caps, ctx)
        })?;
        self.pads.get_mut(pad)?.caps = Some(caps);
        Ok(())
    }
}
