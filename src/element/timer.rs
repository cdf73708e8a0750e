//! Per-element timers, scaled by clock ratios.
//!
//! A timer fires a tick every `interval / ratio` of wall-clock time, where
//! the ratio comes from the clock the timer was started against. The
//! element's message loop sleeps until the earliest `next_tick`; a clock
//! publishing a new ratio rebases every timer bound to it.

use crate::clock::{ClockId, ClockRef, Ratio};
use crate::error::{Error, Result, TimerErrorKind};
use crate::message::{ElementAddress, Message};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Identifier of a timer, unique within its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug)]
struct Timer {
    interval: Duration,
    clock: Option<ClockId>,
    ratio: Ratio,
    next_tick: Instant,
}

/// A clock subscription shared by every timer bound to that clock.
struct Subscription {
    users: usize,
    task: tokio::task::JoinHandle<()>,
}

/// The element's timer table.
pub(crate) struct Timers {
    element: Arc<str>,
    timers: HashMap<TimerId, Timer>,
    subscriptions: HashMap<ClockId, Subscription>,
}

impl Timers {
    pub fn new(element: Arc<str>) -> Self {
        Self {
            element,
            timers: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Start a timer. The first timer on a given clock subscribes the
    /// element to that clock's ratio updates.
    pub fn start(
        &mut self,
        id: TimerId,
        interval: Duration,
        clock: Option<ClockRef>,
        owner: &ElementAddress,
    ) -> Result<()> {
        if self.timers.contains_key(&id) {
            return Err(Error::Timer {
                kind: TimerErrorKind::AlreadyExists,
                id: id.0,
            });
        }
        let (clock_id, ratio) = match &clock {
            Some(clock_ref) => (Some(clock_ref.id()), clock_ref.current_ratio()),
            None => (None, Ratio::ONE),
        };
        if let Some(clock_ref) = &clock {
            self.subscribe(clock_ref, owner);
        }
        self.timers.insert(
            id,
            Timer {
                interval,
                clock: clock_id,
                ratio,
                next_tick: Instant::now() + ratio.scale_interval(interval),
            },
        );
        tracing::debug!(element = %self.element, timer = %id, ?interval, "timer started");
        Ok(())
    }

    /// Stop a timer, dropping the clock subscription with its last user.
    pub fn stop(&mut self, id: TimerId) -> Result<()> {
        let timer = self.timers.remove(&id).ok_or(Error::Timer {
            kind: TimerErrorKind::Unknown,
            id: id.0,
        })?;
        if let Some(clock_id) = timer.clock {
            self.unsubscribe(clock_id);
        }
        tracing::debug!(element = %self.element, timer = %id, "timer stopped");
        Ok(())
    }

    fn subscribe(&mut self, clock: &ClockRef, owner: &ElementAddress) {
        if let Some(subscription) = self.subscriptions.get_mut(&clock.id()) {
            subscription.users += 1;
            return;
        }
        let clock_id = clock.id();
        let mut rx = clock.subscribe();
        let address = owner.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let ratio = *rx.borrow();
                let update = Message::ClockRatioUpdate {
                    clock: clock_id,
                    ratio,
                };
                if address.send(update).is_err() {
                    break;
                }
            }
        });
        self.subscriptions
            .insert(clock_id, Subscription { users: 1, task });
    }

    fn unsubscribe(&mut self, clock: ClockId) {
        let last_user = match self.subscriptions.get_mut(&clock) {
            Some(subscription) => {
                subscription.users -= 1;
                subscription.users == 0
            }
            None => false,
        };
        if last_user {
            if let Some(subscription) = self.subscriptions.remove(&clock) {
                subscription.task.abort();
            }
        }
    }

    /// The earliest pending tick, if any timer is running.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.next_tick).min()
    }

    /// Ids of timers due at `now`, soonest first.
    pub fn due(&self, now: Instant) -> Vec<TimerId> {
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.next_tick <= now)
            .map(|(id, t)| (t.next_tick, *id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Move a timer's deadline one scaled interval forward. Called after
    /// its tick callback has run.
    pub fn advance(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(&id) {
            timer.next_tick += timer.ratio.scale_interval(timer.interval);
        }
    }

    /// A clock published a new ratio: adopt it and rebase every timer
    /// bound to that clock.
    pub fn handle_clock_update(&mut self, clock: ClockId, ratio: Ratio) {
        let now = Instant::now();
        for timer in self.timers.values_mut() {
            if timer.clock == Some(clock) {
                timer.ratio = ratio;
                timer.next_tick = now + ratio.scale_interval(timer.interval);
            }
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        for subscription in self.subscriptions.values() {
            subscription.task.abort();
        }
    }
}

impl fmt::Debug for Timers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers")
            .field("element", &self.element)
            .field("timers", &self.timers)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
