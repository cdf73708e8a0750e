//! Buffer and metadata types.
//!
//! A [`Buffer`] is the unit of data flowing downstream: an opaque,
//! reference-counted payload plus [`Metadata`]. Cloning a buffer is cheap;
//! the payload is shared, not copied.

use crate::clock::ClockTime;
use bytes::Bytes;

/// Flags indicating buffer properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Buffer follows a discontinuity in the stream.
    pub discontinuity: bool,
    /// Buffer contains a sync point (keyframe equivalent).
    pub sync_point: bool,
}

/// Metadata associated with a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Presentation timestamp, if known.
    pub pts: Option<ClockTime>,
    /// Monotonic sequence number assigned by the producer.
    pub sequence: u64,
    /// Property flags.
    pub flags: BufferFlags,
}

impl Metadata {
    /// Create metadata carrying only a sequence number.
    pub fn from_sequence(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    /// Create metadata with a presentation timestamp.
    pub fn with_pts(pts: ClockTime) -> Self {
        Self {
            pts: Some(pts),
            ..Default::default()
        }
    }
}

/// A chunk of stream data flowing downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    payload: Bytes,
    metadata: Metadata,
}

impl Buffer {
    /// Create a buffer from a payload and metadata.
    pub fn new(payload: impl Into<Bytes>, metadata: Metadata) -> Self {
        Self {
            payload: payload.into(),
            metadata,
        }
    }

    /// Create a buffer from a payload with default metadata.
    pub fn from_payload(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, Metadata::default())
    }

    /// The payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The buffer's metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the buffer's metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Split off the first `at` bytes into a new buffer.
    ///
    /// `self` keeps the remainder; both halves share the same backing
    /// allocation and metadata. Used by byte-counted demand to split a
    /// batch at a unit boundary.
    ///
    /// # Panics
    ///
    /// Panics if `at > self.len()`.
    pub fn split_to(&mut self, at: usize) -> Buffer {
        let head = self.payload.split_to(at);
        Buffer {
            payload: head,
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_creation() {
        let buf = Buffer::new(&b"hello"[..], Metadata::from_sequence(7));
        assert_eq!(buf.len(), 5);
        assert!(!buf.is_empty());
        assert_eq!(buf.metadata().sequence, 7);
        assert_eq!(buf.payload().as_ref(), b"hello");
    }

    #[test]
    fn test_buffer_clone_shares_payload() {
        let buf = Buffer::from_payload(vec![0u8; 64]);
        let clone = buf.clone();
        // Bytes clones share the backing storage.
        assert_eq!(buf.payload().as_ptr(), clone.payload().as_ptr());
    }

    #[test]
    fn test_buffer_split() {
        let mut buf = Buffer::new(&b"abcdef"[..], Metadata::from_sequence(1));
        let head = buf.split_to(2);
        assert_eq!(head.payload().as_ref(), b"ab");
        assert_eq!(buf.payload().as_ref(), b"cdef");
        assert_eq!(head.metadata().sequence, 1);
    }

    #[test]
    fn test_metadata_pts() {
        let meta = Metadata::with_pts(crate::clock::ClockTime::from_millis(40));
        assert_eq!(meta.pts.unwrap().millis(), 40);
    }
}
