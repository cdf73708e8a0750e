//! The inter-element message protocol.
//!
//! Every element runtime owns a mailbox; everything that happens to an
//! element — data, demands, link negotiation, playback changes — arrives as
//! a [`Message`] through its [`ElementAddress`]. Mailboxes are unbounded:
//! data-plane backpressure is carried by the demand protocol, and control
//! traffic must never deadlock behind data.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::{ClockId, Ratio};
use crate::element::PlaybackState;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::pad::{PadInfo, PadRef};
use crate::sync::SyncRegistration;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A message deliverable to an element runtime.
pub enum Message {
    /// A batch of buffers arriving on an input pad.
    Buffer {
        /// The receiving pad.
        pad: PadRef,
        /// The batch, in production order.
        buffers: Vec<Buffer>,
    },
    /// Negotiated caps arriving on an input pad.
    Caps {
        /// The receiving pad.
        pad: PadRef,
        /// The format now in effect upstream.
        caps: Caps,
    },
    /// An in-band event arriving on a pad.
    Event {
        /// The receiving pad.
        pad: PadRef,
        /// The event.
        event: Event,
    },
    /// Credit arriving on an output pad from the downstream consumer.
    Demand {
        /// The output pad the demand is for.
        pad: PadRef,
        /// Credit, in the unit agreed at link time.
        size: u64,
    },
    /// Request to walk the playback state machine towards a target.
    ChangePlaybackState {
        /// The state to reach.
        target: PlaybackState,
    },
    /// Resolve a pad name to a concrete pad reference.
    GetPadRef {
        /// Declared pad name.
        name: String,
        /// Reply slot.
        reply: oneshot::Sender<Result<PadRef>>,
    },
    /// Ask this element (the input side) to establish a link.
    Link {
        /// The local input pad to link.
        pad: PadRef,
        /// The upstream endpoint to link to.
        other: Endpoint,
        /// Reply slot.
        reply: oneshot::Sender<Result<()>>,
    },
    /// Peer-to-peer half of the link handshake, carrying the caller's info.
    PeerLink {
        /// The local pad to link.
        pad: PadRef,
        /// The calling endpoint.
        other: Endpoint,
        /// The caller's pad info.
        other_info: PadInfo,
        /// Reply slot resolving to the local pad's info.
        reply: oneshot::Sender<Result<PadInfo>>,
    },
    /// No more links will arrive in this batch.
    LinkingFinished,
    /// Tear down the link on a pad. Idempotent.
    Unlink {
        /// The pad to unlink.
        pad: PadRef,
    },
    /// The linked producer operates in push mode; a pull input receiving
    /// this arms its overflow detector.
    PushModeAnnouncement {
        /// The local input pad.
        pad: PadRef,
    },
    /// A clock this element subscribed to published a new ratio.
    ClockRatioUpdate {
        /// Which clock.
        clock: ClockId,
        /// The new ratio.
        ratio: Ratio,
    },
    /// Re-home the element: subsequent reports and notifications go to
    /// this parent handle.
    SetController {
        /// The new parent seam.
        parent: ParentHandle,
    },
    /// Install or clear the stream sync registration.
    SetStreamSync {
        /// Registration on a barrier, or `None` to detach.
        registration: Option<SyncRegistration>,
    },
    /// An arbitrary user message, routed to `handle_other`.
    Other(Box<dyn Any + Send>),
    /// Graceful stop.
    Shutdown {
        /// Acknowledged once the shutdown callback has run.
        reply: oneshot::Sender<()>,
    },
}

impl Message {
    /// Short name of the message kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer { .. } => "buffer",
            Self::Caps { .. } => "caps",
            Self::Event { .. } => "event",
            Self::Demand { .. } => "demand",
            Self::ChangePlaybackState { .. } => "change_playback_state",
            Self::GetPadRef { .. } => "get_pad_ref",
            Self::Link { .. } => "link",
            Self::PeerLink { .. } => "peer_link",
            Self::LinkingFinished => "linking_finished",
            Self::Unlink { .. } => "unlink",
            Self::PushModeAnnouncement { .. } => "push_mode_announcement",
            Self::ClockRatioUpdate { .. } => "clock_ratio_update",
            Self::SetController { .. } => "set_controller",
            Self::SetStreamSync { .. } => "set_stream_sync",
            Self::Other(_) => "other",
            Self::Shutdown { .. } => "shutdown",
        }
    }

    /// Whether this message belongs to the data plane.
    ///
    /// Data messages are only handled while playing; outside that state
    /// they are parked in the deferred queue.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Self::Buffer { .. } | Self::Caps { .. } | Self::Event { .. } | Self::Demand { .. }
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

// ============================================================================
// Addresses
// ============================================================================

/// A cheap, clonable address of an element's mailbox.
#[derive(Clone)]
pub struct ElementAddress {
    name: Arc<str>,
    tx: kanal::Sender<Message>,
}

impl ElementAddress {
    /// Wrap a mailbox sender into an address.
    ///
    /// Normally produced by the runtime at spawn; exposed for custom
    /// parents and test harnesses standing in for an element.
    pub fn new(name: impl Into<Arc<str>>, tx: kanal::Sender<Message>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// The element's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a message.
    ///
    /// Never blocks (mailboxes are unbounded); fails only once the element
    /// has terminated.
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::Terminated)
    }

    /// Make a synchronous call: send a message built around a reply slot
    /// and await the reply.
    pub async fn call<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Message,
    ) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await.map_err(|_| Error::Terminated)
    }
}

impl fmt::Debug for ElementAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementAddress")
            .field("name", &self.name)
            .finish()
    }
}

/// Create a mailbox and its address.
pub fn mailbox(name: impl Into<Arc<str>>) -> (ElementAddress, kanal::Receiver<Message>) {
    let (tx, rx) = kanal::unbounded();
    (ElementAddress::new(name, tx), rx)
}

/// One end of a link: an element plus one of its pads.
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// The element's address.
    pub element: ElementAddress,
    /// The pad on that element.
    pub pad: PadRef,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(element: ElementAddress, pad: PadRef) -> Self {
        Self { element, pad }
    }
}

/// Where a pull input sends its demand: the upstream element plus the
/// output pad ref the upstream knows the link by.
#[derive(Clone, Debug)]
pub struct DemandSender {
    target: ElementAddress,
    pad: PadRef,
}

impl DemandSender {
    /// Create a demand sender towards an upstream output pad.
    pub fn new(target: ElementAddress, pad: PadRef) -> Self {
        Self { target, pad }
    }

    /// Issue `size` units of credit upstream.
    pub fn send(&self, size: u64) {
        let message = Message::Demand {
            pad: self.pad.clone(),
            size,
        };
        if self.target.send(message).is_err() {
            tracing::trace!(
                upstream = self.target.name(),
                pad = %self.pad,
                "demand dropped: upstream terminated"
            );
        }
    }
}

// ============================================================================
// Parent seam
// ============================================================================

/// What an element reports to its parent.
pub enum ParentMessage {
    /// The element reached a playback state.
    PlaybackStateChanged {
        /// Reporting element.
        element: Arc<str>,
        /// The state it reached.
        state: PlaybackState,
    },
    /// A user notification emitted via the notify action.
    Notification {
        /// Reporting element.
        element: Arc<str>,
        /// Opaque notification payload.
        payload: Box<dyn Any + Send>,
    },
    /// The element hit an error; it has transitioned to stopped.
    ElementError {
        /// Reporting element.
        element: Arc<str>,
        /// What went wrong.
        error: Error,
    },
}

impl fmt::Debug for ParentMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlaybackStateChanged { element, state } => write!(
                f,
                "PlaybackStateChanged({element}, {state:?})"
            ),
            Self::Notification { element, .. } => write!(f, "Notification({element})"),
            Self::ElementError { element, error } => {
                write!(f, "ElementError({element}, {error})")
            }
        }
    }
}

/// The element-side handle onto its parent.
#[derive(Clone)]
pub struct ParentHandle {
    tx: kanal::Sender<ParentMessage>,
}

impl ParentHandle {
    /// Report to the parent. Reports to a dead parent are dropped; the
    /// monitor will surface the crash separately.
    pub fn send(&self, message: ParentMessage) {
        let _ = self.tx.send(message);
    }
}

impl fmt::Debug for ParentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParentHandle")
    }
}

/// Create the parent seam: a handle to give to elements and the receiver
/// the parent drains.
pub fn parent_channel() -> (ParentHandle, kanal::Receiver<ParentMessage>) {
    let (tx, rx) = kanal::unbounded();
    (ParentHandle { tx }, rx)
}

// ============================================================================
// Liveness monitors
// ============================================================================

/// Held by the watched party; dropping it (or the process dying with it)
/// trips the paired [`Monitor`].
#[derive(Debug)]
pub struct MonitorGuard {
    _tx: oneshot::Sender<()>,
}

/// Observes the liveness of whoever holds the paired [`MonitorGuard`].
#[derive(Debug)]
pub struct Monitor {
    pub(crate) rx: oneshot::Receiver<()>,
}

impl Monitor {
    /// Resolve when the watched party is gone.
    pub async fn down(&mut self) {
        let _ = (&mut self.rx).await;
    }
}

/// Create a monitor pair.
pub fn monitor() -> (MonitorGuard, Monitor) {
    let (tx, rx) = oneshot::channel();
    (MonitorGuard { _tx: tx }, Monitor { rx })
}
