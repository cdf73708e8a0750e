//! Clock and time types.
//!
//! This module provides:
//! - [`ClockTime`]: A nanosecond timestamp type (8 bytes, Copy)
//! - [`Ratio`]: A rational scale between nominal time and wall-clock time
//! - [`Clock`]: An owned time source publishing ratio updates
//! - [`ClockRef`]: A cheap subscriber handle onto a [`Clock`]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// ClockTime
// ============================================================================

/// Time in nanoseconds (8 bytes, Copy).
///
/// Represents time as nanoseconds since an arbitrary epoch (usually stream
/// start). Buffer timestamps and sync latencies are expressed in this type.
///
/// # Examples
///
/// ```rust
/// use weir::clock::ClockTime;
///
/// let t1 = ClockTime::from_secs(1);
/// let t2 = ClockTime::from_millis(500);
/// let t3 = t1.saturating_add(t2);
///
/// assert_eq!(t3.millis(), 1500);
/// assert_eq!(format!("{}", t3), "1.500s");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time.
    pub const MAX: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us.saturating_mul(1_000))
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Get as nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Get as microseconds (truncated).
    #[inline]
    pub const fn micros(self) -> u64 {
        self.0 / 1_000
    }

    /// Get as milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Get as seconds (truncated).
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Saturating addition.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Checked subtraction. Returns `None` on underflow.
    #[inline]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        Self(d.as_nanos().min(u64::MAX as u128) as u64)
    }
}

impl From<ClockTime> for Duration {
    fn from(t: ClockTime) -> Self {
        Duration::from_nanos(t.0)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.millis() % 1_000)
    }
}

// ============================================================================
// Ratio
// ============================================================================

/// A rational scale between nominal time and wall-clock time.
///
/// A clock publishes its current ratio to subscribers; timers divide their
/// nominal interval by it. `Ratio::ONE` means the clock runs at wall-clock
/// speed; `2/1` means nominal time passes twice as fast as wall-clock time,
/// so a 100ms nominal interval fires every 50ms of wall-clock time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ratio {
    /// Numerator (nominal units).
    pub num: u64,
    /// Denominator (wall-clock units).
    pub den: u64,
}

impl Ratio {
    /// The identity ratio.
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// Create a new ratio.
    ///
    /// # Panics
    ///
    /// Panics if either component is zero.
    pub const fn new(num: u64, den: u64) -> Self {
        assert!(num > 0 && den > 0, "ratio components must be non-zero");
        Self { num, den }
    }

    /// Scale a nominal interval to wall-clock time (`interval / ratio`).
    pub fn scale_interval(&self, interval: Duration) -> Duration {
        let nanos = interval.as_nanos() * self.den as u128 / self.num as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Get as a floating-point value.
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Identifier of a clock instance, unique within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockId(u64);

impl fmt::Display for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock-{}", self.0)
    }
}

fn next_clock_id() -> ClockId {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    ClockId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// An owned time source publishing ratio updates to subscribers.
///
/// Only the owner of a `Clock` can change the ratio; everyone else holds a
/// [`ClockRef`] and observes updates. Dropping the `Clock` ends the update
/// stream for all subscribers.
#[derive(Debug)]
pub struct Clock {
    id: ClockId,
    tx: watch::Sender<Ratio>,
    subscriber: Arc<watch::Receiver<Ratio>>,
}

impl Clock {
    /// Create a clock with the identity ratio.
    pub fn new() -> Self {
        Self::with_ratio(Ratio::ONE)
    }

    /// Create a clock with an initial ratio.
    pub fn with_ratio(ratio: Ratio) -> Self {
        let (tx, rx) = watch::channel(ratio);
        Self {
            id: next_clock_id(),
            tx,
            subscriber: Arc::new(rx),
        }
    }

    /// This clock's identifier.
    pub fn id(&self) -> ClockId {
        self.id
    }

    /// The current ratio.
    pub fn ratio(&self) -> Ratio {
        *self.tx.borrow()
    }

    /// Publish a new ratio to all subscribers.
    pub fn set_ratio(&self, ratio: Ratio) {
        let _ = self.tx.send(ratio);
    }

    /// Obtain a subscriber handle.
    pub fn get_ref(&self) -> ClockRef {
        ClockRef {
            id: self.id,
            rx: self.subscriber.clone(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheap subscriber handle onto a [`Clock`].
#[derive(Clone, Debug)]
pub struct ClockRef {
    id: ClockId,
    rx: Arc<watch::Receiver<Ratio>>,
}

impl ClockRef {
    /// The identifier of the clock this handle refers to.
    pub fn id(&self) -> ClockId {
        self.id
    }

    /// The ratio the clock last published.
    pub fn current_ratio(&self) -> Ratio {
        *self.rx.borrow()
    }

    /// Subscribe to ratio updates.
    ///
    /// The returned receiver yields the ratio current at subscription time
    /// and every update after it.
    pub fn subscribe(&self) -> watch::Receiver<Ratio> {
        (*self.rx).clone()
    }
}
