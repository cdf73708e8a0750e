//! Stream format descriptors and negotiation constraints.
//!
//! Linked pads agree on a format before data flows. A [`Caps`] value is a
//! fully-determined format travelling in-band with the stream; a
//! [`CapsSpec`] is the constraint a pad declares about what it accepts.
//! The core consumes only two predicates: whether concrete caps satisfy a
//! spec, and whether two specs can intersect at all (checked when pads are
//! linked).

use smallvec::SmallVec;
use std::fmt;

/// A constraint on a single format parameter.
///
/// Supports intersection, used at link time to verify that two pads can
/// agree on some format.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum CapsValue<T> {
    /// Any value accepted (unconstrained).
    #[default]
    Any,
    /// Exact value.
    Fixed(T),
    /// Inclusive range of acceptable values.
    Range {
        /// Minimum acceptable value.
        min: T,
        /// Maximum acceptable value.
        max: T,
    },
    /// Acceptable values, ordered by preference.
    List(SmallVec<[T; 4]>),
}

impl<T: Clone + Ord> CapsValue<T> {
    /// Check whether a concrete value satisfies this constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Any => true,
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
        }
    }

    /// Whether two constraints admit at least one common value.
    pub fn intersects(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Fixed(a), Self::Fixed(b)) => a == b,
            (Self::Fixed(v), constraint) | (constraint, Self::Fixed(v)) => constraint.accepts(v),
            (Self::Range { min: a, max: b }, Self::Range { min: c, max: d }) => {
                a.max(c) <= b.min(d)
            }
            (Self::Range { .. }, Self::List(list)) | (Self::List(list), Self::Range { .. }) => {
                let range = if matches!(self, Self::Range { .. }) {
                    self
                } else {
                    other
                };
                list.iter().any(|v| range.accepts(v))
            }
            (Self::List(a), Self::List(b)) => a.iter().any(|v| b.contains(v)),
        }
    }
}

/// Broad class of the stream content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MediaKind {
    /// Audio samples.
    Audio,
    /// Video frames.
    Video,
    /// Untyped binary data.
    Binary,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

/// A fully-determined stream format, negotiated between linked pads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caps {
    /// Content class.
    pub media: MediaKind,
    /// Sample or frame rate.
    pub rate: u32,
    /// Channel (or plane) count.
    pub channels: u32,
}

impl Caps {
    /// Create concrete caps.
    pub fn new(media: MediaKind, rate: u32, channels: u32) -> Self {
        Self {
            media,
            rate,
            channels,
        }
    }

    /// Caps for untyped binary streams.
    pub fn binary() -> Self {
        Self::new(MediaKind::Binary, 0, 0)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}x{}", self.media, self.rate, self.channels)
    }
}

/// The constraint a pad declares about the caps it accepts.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CapsSpec {
    /// Accepted content classes.
    pub media: CapsValue<MediaKind>,
    /// Accepted rates.
    pub rate: CapsValue<u32>,
    /// Accepted channel counts.
    pub channels: CapsValue<u32>,
}

impl CapsSpec {
    /// A spec accepting anything.
    pub fn any() -> Self {
        Self::default()
    }

    /// A spec fixed to a single media kind, other parameters unconstrained.
    pub fn for_media(media: MediaKind) -> Self {
        Self {
            media: CapsValue::Fixed(media),
            ..Default::default()
        }
    }

    /// Check whether concrete caps satisfy this spec.
    pub fn accepts(&self, caps: &Caps) -> bool {
        self.media.accepts(&caps.media)
            && self.rate.accepts(&caps.rate)
            && self.channels.accepts(&caps.channels)
    }

    /// Whether this spec and another can agree on at least one format.
    ///
    /// Checked when two pads are linked: statically incompatible specs make
    /// the link fail before any data flows.
    pub fn intersects(&self, other: &Self) -> bool {
        self.media.intersects(&other.media)
            && self.rate.intersects(&other.rate)
            && self.channels.intersects(&other.channels)
    }
}

impl fmt::Display for CapsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part<T: fmt::Debug>(v: &CapsValue<T>) -> String {
            match v {
                CapsValue::Any => "*".to_string(),
                CapsValue::Fixed(x) => format!("{x:?}"),
                CapsValue::Range { min, max } => format!("{min:?}..{max:?}"),
                CapsValue::List(xs) => format!("{xs:?}"),
            }
        }
        write!(
            f,
            "media={} rate={} channels={}",
            part(&self.media),
            part(&self.rate),
            part(&self.channels)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_caps_value_accepts() {
        assert!(CapsValue::Any.accepts(&42));
        assert!(CapsValue::Fixed(42).accepts(&42));
        assert!(!CapsValue::Fixed(42).accepts(&43));
        assert!(CapsValue::Range { min: 10, max: 20 }.accepts(&15));
        assert!(!CapsValue::Range { min: 10, max: 20 }.accepts(&21));
        let list: CapsValue<u32> = CapsValue::List(smallvec![8000, 44100, 48000]);
        assert!(list.accepts(&44100));
        assert!(!list.accepts(&96000));
    }

    #[test]
    fn test_caps_value_intersects() {
        let range = CapsValue::Range { min: 10, max: 20 };
        assert!(range.intersects(&CapsValue::Fixed(12)));
        assert!(!range.intersects(&CapsValue::Fixed(30)));
        assert!(range.intersects(&CapsValue::Range { min: 20, max: 40 }));
        assert!(!range.intersects(&CapsValue::Range { min: 21, max: 40 }));
        let list: CapsValue<u32> = CapsValue::List(smallvec![5, 15]);
        assert!(range.intersects(&list));
        assert!(list.intersects(&range));
        let other: CapsValue<u32> = CapsValue::List(smallvec![15, 99]);
        assert!(list.intersects(&other));
    }

    #[test]
    fn test_spec_accepts_caps() {
        let spec = CapsSpec {
            media: CapsValue::Fixed(MediaKind::Audio),
            rate: CapsValue::Range {
                min: 8_000,
                max: 48_000,
            },
            channels: CapsValue::List(smallvec![1, 2]),
        };
        assert!(spec.accepts(&Caps::new(MediaKind::Audio, 44_100, 2)));
        assert!(!spec.accepts(&Caps::new(MediaKind::Video, 44_100, 2)));
        assert!(!spec.accepts(&Caps::new(MediaKind::Audio, 96_000, 2)));
        assert!(!spec.accepts(&Caps::new(MediaKind::Audio, 44_100, 6)));
    }

    #[test]
    fn test_spec_intersection() {
        let audio = CapsSpec::for_media(MediaKind::Audio);
        let video = CapsSpec::for_media(MediaKind::Video);
        assert!(audio.intersects(&CapsSpec::any()));
        assert!(!audio.intersects(&video));
    }
}
