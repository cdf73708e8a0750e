//! The element runtime: one task, one mailbox, one element.
//!
//! [`start`] spawns a cooperative task hosting a single behavior. The task
//! owns everything the element touches — pads, queues, timers, playback
//! state — so no lock is ever taken and no two callbacks run concurrently.
//! All interaction goes through the element's [`ElementAddress`].
//!
//! Dispatch policy: control messages (playback, linking, timers, clocks)
//! are handled in every playback state; data messages (buffers, caps,
//! events, demands) are handled while playing and deferred into the
//! [`PlaybackBuffer`](super::playback::PlaybackBuffer) otherwise. Buffer
//! messages are first offered to a hot-path shortcut that feeds push inputs
//! directly; everything else takes the generic path.

use crate::clock::ClockRef;
use crate::element::action::CallbackKind;
use crate::element::behavior::{CallbackResult, ElementBehavior, ElementType};
use crate::element::context::Context;
use crate::element::playback::{Playback, PlaybackBuffer, PlaybackState};
use crate::element::timer::Timers;
use crate::error::{Error, Result};
use crate::message::{
    mailbox, ElementAddress, Endpoint, Message, Monitor, ParentHandle, ParentMessage,
};
use crate::pad::{PadInfo, PadRef, PadsState};
use crate::sync::SyncRegistration;
use crate::telemetry;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Options for starting an element.
#[derive(Debug)]
pub struct StartOptions {
    /// Element name, unique within its parent.
    pub name: String,
    /// Where lifecycle reports and notifications go.
    pub parent: ParentHandle,
    /// Observes the parent; its loss shuts the element down.
    pub parent_monitor: Monitor,
    /// The clock timers default to.
    pub clock: Option<ClockRef>,
    /// Barrier registration synchronizing entry into playing.
    pub sync: Option<SyncRegistration>,
    /// Processing latency reported to the barrier.
    pub sync_latency: Duration,
}

impl StartOptions {
    /// Options with no clock and no barrier.
    pub fn new(name: impl Into<String>, parent: ParentHandle, parent_monitor: Monitor) -> Self {
        Self {
            name: name.into(),
            parent,
            parent_monitor,
            clock: None,
            sync: None,
            sync_latency: Duration::ZERO,
        }
    }

    /// Give the element a default clock.
    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register the element on a sync barrier with the given latency.
    pub fn with_sync(mut self, registration: SyncRegistration, latency: Duration) -> Self {
        self.sync = Some(registration);
        self.sync_latency = latency;
        self
    }
}

/// Handle to a running element, held by its parent.
#[derive(Debug)]
pub struct ElementHandle {
    address: ElementAddress,
    task: JoinHandle<()>,
}

impl ElementHandle {
    /// The element's address.
    pub fn address(&self) -> &ElementAddress {
        &self.address
    }

    /// The element's name.
    pub fn name(&self) -> &str {
        self.address.name()
    }

    /// Ask the element to walk its playback state machine to `target`.
    pub fn change_playback_state(&self, target: PlaybackState) -> Result<()> {
        self.address.send(Message::ChangePlaybackState { target })
    }

    /// Gracefully stop the element, waiting up to `timeout` for the
    /// shutdown callback to run. On timeout the task is killed.
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.address.send(Message::Shutdown { reply: tx }).is_err() {
            // Already gone; nothing to wait for.
            let _ = self.task.await;
            return Ok(());
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => {
                let _ = self.task.await;
                Ok(())
            }
            _ => {
                self.task.abort();
                Err(Error::Terminated)
            }
        }
    }
}

/// Spawn an element runtime.
///
/// Validates the behavior's pad declarations, runs `handle_init`, and
/// starts the message loop. Must be called from within a tokio runtime.
pub fn start(behavior: impl ElementBehavior, options: StartOptions) -> Result<ElementHandle> {
    let name: Arc<str> = options.name.into();
    let mut behavior: Box<dyn ElementBehavior> = Box::new(behavior);

    let pads = PadsState::new(name.clone(), behavior.pads())?;
    let element_type = behavior.element_type();
    {
        let ctx = Context::new(&name, PlaybackState::Stopped, &pads);
        behavior.handle_init(&ctx).map_err(|error| Error::Init {
            reason: error.to_string(),
        })?;
    }
    telemetry::record_element_init(&name);

    let (address, rx) = mailbox(name.clone());
    let core = Core {
        name,
        behavior,
        element_type,
        pads,
        playback: Playback::default(),
        playback_buffer: PlaybackBuffer::default(),
        timers: Timers::new(address.name().into()),
        parent: options.parent,
        parent_monitor: Some(options.parent_monitor),
        clock: options.clock,
        sync: options.sync,
        sync_latency: options.sync_latency,
        address: address.clone(),
        pending_redemands: VecDeque::new(),
        draining: false,
        shutdown_reply: None,
    };
    let task = tokio::spawn(core.run(rx.to_async()));
    Ok(ElementHandle { address, task })
}

/// The state owned by one element task. Controllers for demand, stream
/// data and actions extend this type from their own modules.
pub(crate) struct Core {
    pub(crate) name: Arc<str>,
    pub(crate) behavior: Box<dyn ElementBehavior>,
    pub(crate) element_type: ElementType,
    pub(crate) pads: PadsState,
    pub(crate) playback: Playback,
    playback_buffer: PlaybackBuffer,
    pub(crate) timers: Timers,
    pub(crate) parent: ParentHandle,
    parent_monitor: Option<Monitor>,
    pub(crate) clock: Option<ClockRef>,
    sync: Option<SyncRegistration>,
    sync_latency: Duration,
    pub(crate) address: ElementAddress,
    pub(crate) pending_redemands: VecDeque<PadRef>,
    pub(crate) draining: bool,
    shutdown_reply: Option<oneshot::Sender<()>>,
}

impl Core {
    pub(crate) async fn run(mut self, rx: kanal::AsyncReceiver<Message>) {
        tracing::debug!(element = %self.name, "element task started");
        let mut monitor = self.parent_monitor.take();
        loop {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Ok(message) => {
                        if self.handle_message(message).await.is_break() {
                            break;
                        }
                    }
                    // Every address dropped; nobody can reach us again.
                    Err(_) => break,
                },
                _ = async { monitor.as_mut().expect("guarded").down().await },
                    if monitor.is_some() =>
                {
                    self.on_parent_crash();
                    break;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    if self.fire_due_timers().is_break() {
                        break;
                    }
                }
            }
        }
        self.behavior.handle_shutdown();
        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(());
        }
        telemetry::record_element_terminate(&self.name);
        tracing::debug!(element = %self.name, "element task finished");
    }

    async fn handle_message(&mut self, message: Message) -> ControlFlow<()> {
        if message.is_data() && self.playback.current() != PlaybackState::Playing {
            tracing::trace!(
                element = %self.name,
                kind = message.kind(),
                "deferring data message until playing"
            );
            self.playback_buffer.push(message);
            return ControlFlow::Continue(());
        }

        let result = match message {
            Message::Buffer { pad, buffers } => {
                let mut buffers = Some(buffers);
                match self.try_hot_path(&pad, &mut buffers) {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        let buffers = buffers.take().expect("hot path must not consume on miss");
                        self.handle_incoming_buffers(pad, buffers)
                    }
                    Err(error) => Err(error),
                }
            }
            Message::Caps { pad, caps } => self.handle_incoming_caps(pad, caps),
            Message::Event { pad, event } => self.handle_incoming_event(pad, event),
            Message::Demand { pad, size } => self.handle_incoming_demand(pad, size),
            Message::ChangePlaybackState { target } => self.change_playback_state(target).await,
            Message::GetPadRef { name, reply } => {
                let _ = reply.send(self.pads.get_pad_ref(&name));
                Ok(())
            }
            Message::Link { pad, other, reply } => {
                let result = self.initiate_link(pad, other).await;
                let _ = reply.send(result);
                self.notify_late_added()
            }
            Message::PeerLink {
                pad,
                other,
                other_info,
                reply,
            } => {
                let result = self.accept_link(pad, other, &other_info);
                let _ = reply.send(result);
                self.notify_late_added()
            }
            Message::LinkingFinished => {
                let added = self.pads.linking_finished();
                self.notify_added(added)
            }
            Message::Unlink { pad } => self.handle_unlink_message(pad),
            Message::PushModeAnnouncement { pad } => self.pads.enable_toilet_if_pull(&pad),
            Message::ClockRatioUpdate { clock, ratio } => {
                self.timers.handle_clock_update(clock, ratio);
                Ok(())
            }
            Message::SetController { parent } => {
                self.parent = parent;
                Ok(())
            }
            Message::SetStreamSync { registration } => {
                self.sync = registration;
                Ok(())
            }
            Message::Other(payload) => self.invoke(CallbackKind::Other, |behavior, ctx| {
                behavior.handle_other(payload, ctx)
            }),
            Message::Shutdown { reply } => {
                self.shutdown_reply = Some(reply);
                return ControlFlow::Break(());
            }
        };

        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(error) => self.on_error(error),
        }
    }

    // ------------------------------------------------------------------
    // Callback plumbing
    // ------------------------------------------------------------------

    /// Run a callback and perform its actions. Redemands queued by the
    /// actions are *not* flushed; callers that may trigger production use
    /// [`invoke`](Self::invoke).
    pub(crate) fn invoke_raw(
        &mut self,
        kind: CallbackKind,
        f: impl FnOnce(&mut dyn ElementBehavior, &Context<'_>) -> CallbackResult,
    ) -> Result<()> {
        let actions = {
            let ctx = Context::new(&self.name, self.playback.effective(), &self.pads);
            f(self.behavior.as_mut(), &ctx)?
        };
        self.process_actions(kind, actions)
    }

    /// Run a callback, perform its actions, then keep re-entering
    /// `handle_demand` for any pads the actions redemanded.
    pub(crate) fn invoke(
        &mut self,
        kind: CallbackKind,
        f: impl FnOnce(&mut dyn ElementBehavior, &Context<'_>) -> CallbackResult,
    ) -> Result<()> {
        self.invoke_raw(kind, f)?;
        self.flush_redemands()
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    async fn change_playback_state(&mut self, target: PlaybackState) -> Result<()> {
        if self.playback.pending().is_some() {
            tracing::warn!(
                element = %self.name,
                "playback transition already in progress; request ignored"
            );
            return Ok(());
        }
        while let Some(next) = self.playback.current().step_towards(target) {
            let from = self.playback.current();
            self.playback.begin(next);
            if let Err(error) = self.run_transition_callback(from, next) {
                self.playback.abort();
                return Err(error);
            }
            if next == PlaybackState::Playing {
                if let Some(sync) = &self.sync {
                    // Rendezvous with the other elements entering playing.
                    if let Err(error) = sync.sync(self.sync_latency).await {
                        tracing::warn!(element = %self.name, %error, "stream sync failed");
                    }
                }
            }
            self.playback.commit();
            if next == PlaybackState::Playing {
                self.drain_playback_buffer()?;
            }
            tracing::debug!(element = %self.name, state = %next, "playback state reached");
            self.parent.send(ParentMessage::PlaybackStateChanged {
                element: self.name.clone(),
                state: next,
            });
        }
        Ok(())
    }

    fn run_transition_callback(&mut self, from: PlaybackState, to: PlaybackState) -> Result<()> {
        use PlaybackState::*;
        match (from, to) {
            (Stopped, Prepared) => self.invoke(CallbackKind::StoppedToPrepared, |b, ctx| {
                b.handle_stopped_to_prepared(ctx)
            }),
            (Prepared, Playing) => self.invoke(CallbackKind::PreparedToPlaying, |b, ctx| {
                b.handle_prepared_to_playing(ctx)
            }),
            (Playing, Prepared) => self.invoke(CallbackKind::PlayingToPrepared, |b, ctx| {
                b.handle_playing_to_prepared(ctx)
            }),
            (Prepared, Stopped) => self.invoke(CallbackKind::PreparedToStopped, |b, ctx| {
                b.handle_prepared_to_stopped(ctx)
            }),
            _ => Ok(()),
        }
    }

    /// Replay deferred data messages in arrival order, then run one
    /// batched supply pass so queued buffers reach the element together.
    /// A replay failure aborts the drain and leaves the rest queued.
    fn drain_playback_buffer(&mut self) -> Result<()> {
        if self.playback_buffer.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            element = %self.name,
            queued = self.playback_buffer.len(),
            "draining deferred messages"
        );
        self.draining = true;
        let result = (|| {
            while let Some(message) = self.playback_buffer.pop() {
                match message {
                    Message::Buffer { pad, buffers } => self.handle_incoming_buffers(pad, buffers)?,
                    Message::Caps { pad, caps } => self.handle_incoming_caps(pad, caps)?,
                    Message::Event { pad, event } => self.handle_incoming_event(pad, event)?,
                    Message::Demand { pad, size } => self.handle_incoming_demand(pad, size)?,
                    other => {
                        debug_assert!(false, "non-data message {other:?} in playback buffer");
                    }
                }
            }
            Ok(())
        })();
        self.draining = false;
        result?;
        self.supply_all_pending()
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    /// Drive the link handshake from this side: call the peer with our pad
    /// info, then commit the link against the info it returns.
    async fn initiate_link(&mut self, pad: PadRef, other: Endpoint) -> Result<()> {
        let my_info = self.pads.pad_info(&pad)?;
        let direction = my_info.direction;
        let reverse = Endpoint::new(self.address.clone(), pad.clone());
        let other_pad = other.pad.clone();
        let peer_info = other
            .element
            .call(|reply| Message::PeerLink {
                pad: other_pad,
                other: reverse,
                other_info: my_info,
                reply,
            })
            .await??;
        match self.pads.handle_link(direction, &pad, other.clone(), &peer_info) {
            Ok(_) => {
                telemetry::record_link_new(other.element.name(), self.address.name());
                tracing::debug!(
                    element = %self.name,
                    pad = %pad,
                    peer = other.element.name(),
                    peer_pad = %peer_info.pad,
                    "link established"
                );
                Ok(())
            }
            Err(error) => {
                // The peer committed its half already; roll it back.
                let _ = other.element.send(Message::Unlink {
                    pad: peer_info.pad.clone(),
                });
                Err(error)
            }
        }
    }

    fn accept_link(
        &mut self,
        pad: PadRef,
        other: Endpoint,
        other_info: &PadInfo,
    ) -> Result<PadInfo> {
        let direction = self.pads.pad_info(&pad)?.direction;
        self.pads.handle_link(direction, &pad, other, other_info)
    }

    fn handle_unlink_message(&mut self, pad: PadRef) -> Result<()> {
        if let Some(removed) = self.pads.handle_unlink(&pad) {
            self.invoke(CallbackKind::PadRemoved, |behavior, ctx| {
                behavior.handle_pad_removed(&removed, ctx)
            })?;
        }
        Ok(())
    }

    fn notify_added(&mut self, added: Vec<PadRef>) -> Result<()> {
        for pad in added {
            self.invoke(CallbackKind::PadAdded, |behavior, ctx| {
                behavior.handle_pad_added(&pad, ctx)
            })?;
        }
        Ok(())
    }

    /// After `linking_finished`, late links notify immediately.
    fn notify_late_added(&mut self) -> Result<()> {
        if self.pads.is_linking_finished() {
            let added = self.pads.drain_pending_added();
            self.notify_added(added)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn fire_due_timers(&mut self) -> ControlFlow<()> {
        let now = Instant::now();
        for id in self.timers.due(now) {
            let result = self.invoke(CallbackKind::Tick, |behavior, ctx| {
                behavior.handle_tick(id, ctx)
            });
            self.timers.advance(id);
            if let Err(error) = result {
                if self.on_error(error).is_break() {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    // ------------------------------------------------------------------
    // Failure paths
    // ------------------------------------------------------------------

    /// Central error policy: log, fall back to stopped, report to the
    /// parent. A toilet overflow additionally kills the element.
    fn on_error(&mut self, error: Error) -> ControlFlow<()> {
        tracing::error!(
            element = %self.name,
            %error,
            "element error; transitioning to stopped"
        );
        let fatal = matches!(error, Error::ToiletOverflow { .. });
        self.fall_back_to_stopped();
        self.parent.send(ParentMessage::ElementError {
            element: self.name.clone(),
            error,
        });
        if fatal {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Walk down to stopped, best effort; transition callback errors on
    /// this path are logged and swallowed.
    fn fall_back_to_stopped(&mut self) {
        self.playback.abort();
        while let Some(next) = self.playback.current().step_towards(PlaybackState::Stopped) {
            let from = self.playback.current();
            self.playback.begin(next);
            if let Err(error) = self.run_transition_callback(from, next) {
                tracing::warn!(
                    element = %self.name,
                    %error,
                    "transition callback failed during error fallback"
                );
            }
            self.playback.commit();
            self.parent.send(ParentMessage::PlaybackStateChanged {
                element: self.name.clone(),
                state: next,
            });
        }
    }

    fn on_parent_crash(&mut self) {
        let error = Error::ParentCrash {
            reason: "monitor reported parent down".into(),
        };
        tracing::error!(element = %self.name, %error, "shutting down");
        self.fall_back_to_stopped();
    }
}
