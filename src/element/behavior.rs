//! The element behavior contract.
//!
//! User elements implement [`ElementBehavior`]: a capability record of
//! callbacks the runtime invokes as messages arrive. Callbacks are
//! synchronous and never re-enter the runtime; anything an element wants
//! done — sending buffers, demanding data, starting timers — is expressed
//! as [`Action`]s in the return value and performed by the runtime after
//! the callback returns.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::action::Action;
use crate::element::context::Context;
use crate::element::timer::TimerId;
use crate::error::Result;
use crate::event::Event;
use crate::pad::{DemandUnit, PadRef, PadSpec};
use smallvec::SmallVec;
use std::any::Any;

/// Actions returned from a callback, in execution order.
pub type Actions = SmallVec<[Action; 4]>;

/// What every behavior callback returns.
pub type CallbackResult = Result<Actions>;

/// Convenience: an empty action list.
pub fn no_actions() -> CallbackResult {
    Ok(Actions::new())
}

/// Broad role of an element in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElementType {
    /// Produces buffers.
    Source,
    /// Transforms buffers.
    #[default]
    Filter,
    /// Consumes buffers.
    Sink,
}

/// The callbacks a user element provides.
///
/// Every callback has a default implementation, so an element implements
/// only what it cares about. State lives in `self`; the runtime owns the
/// behavior exclusively and never runs two callbacks concurrently.
///
/// # Example
///
/// ```rust
/// use weir::element::{ElementBehavior, ElementType, CallbackResult, Context, no_actions};
/// use weir::pad::{PadRef, PadSpec};
/// use weir::buffer::Buffer;
///
/// struct CountingSink {
///     received: u64,
/// }
///
/// impl ElementBehavior for CountingSink {
///     fn element_type(&self) -> ElementType {
///         ElementType::Sink
///     }
///
///     fn pads(&self) -> Vec<PadSpec> {
///         vec![PadSpec::input("input")]
///     }
///
///     fn handle_process(
///         &mut self,
///         _pad: &PadRef,
///         buffers: Vec<Buffer>,
///         _ctx: &Context<'_>,
///     ) -> CallbackResult {
///         self.received += buffers.len() as u64;
///         no_actions()
///     }
/// }
/// ```
pub trait ElementBehavior: Send + 'static {
    /// The element's role; decides whether buffers arrive through
    /// [`handle_process`](Self::handle_process) or
    /// [`handle_write`](Self::handle_write).
    fn element_type(&self) -> ElementType {
        ElementType::Filter
    }

    /// Static pad declarations.
    fn pads(&self) -> Vec<PadSpec> {
        Vec::new()
    }

    /// Called once before the element starts processing messages.
    fn handle_init(&mut self, _ctx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Playback moved `stopped → prepared`.
    fn handle_stopped_to_prepared(&mut self, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// Playback moved `prepared → playing`.
    fn handle_prepared_to_playing(&mut self, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// Playback moved `playing → prepared`.
    fn handle_playing_to_prepared(&mut self, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// Playback moved `prepared → stopped`.
    fn handle_prepared_to_stopped(&mut self, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// An on-request pad instance was created.
    fn handle_pad_added(&mut self, _pad: &PadRef, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// An on-request pad instance was destroyed.
    fn handle_pad_removed(&mut self, _pad: &PadRef, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// Downstream demand accumulated on a pull output pad.
    ///
    /// `size` is the total outstanding demand, counted in `unit`.
    fn handle_demand(
        &mut self,
        _pad: &PadRef,
        _size: u64,
        _unit: DemandUnit,
        _ctx: &Context<'_>,
    ) -> CallbackResult {
        no_actions()
    }

    /// Buffers arrived on an input pad (sources and filters).
    fn handle_process(
        &mut self,
        _pad: &PadRef,
        _buffers: Vec<Buffer>,
        _ctx: &Context<'_>,
    ) -> CallbackResult {
        no_actions()
    }

    /// Buffers arrived on an input pad of a sink.
    ///
    /// Defaults to delegating to [`handle_process`](Self::handle_process),
    /// so simple sinks implement only one of the two.
    fn handle_write(
        &mut self,
        pad: &PadRef,
        buffers: Vec<Buffer>,
        ctx: &Context<'_>,
    ) -> CallbackResult {
        self.handle_process(pad, buffers, ctx)
    }

    /// Caps arrived on an input pad and passed the acceptance check.
    fn handle_caps(&mut self, _pad: &PadRef, _caps: &Caps, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// An event arrived on a pad.
    fn handle_event(&mut self, _pad: &PadRef, _event: &Event, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// A timer started by this element fired.
    fn handle_tick(&mut self, _id: TimerId, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// An unrecognized message was routed to this element.
    fn handle_other(&mut self, _message: Box<dyn Any + Send>, _ctx: &Context<'_>) -> CallbackResult {
        no_actions()
    }

    /// Called once on termination, after the message loop has stopped.
    fn handle_shutdown(&mut self) {}
}
