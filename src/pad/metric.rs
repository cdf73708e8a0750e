//! Demand accounting units.
//!
//! Demand is a number, but the number means nothing without a unit: a pad
//! counts credit either in whole buffers or in payload bytes. The unit also
//! defines how a batch is split when a consumer takes less than a full
//! queued record.

use crate::buffer::Buffer;

/// The unit in which a pad counts demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DemandUnit {
    /// Credit counts whole buffers.
    #[default]
    Buffers,
    /// Credit counts payload bytes.
    Bytes,
}

impl DemandUnit {
    /// Default preferred queue size for this unit.
    pub fn default_preferred_size(self) -> u64 {
        match self {
            Self::Buffers => 32,
            Self::Bytes => 64 * 1024,
        }
    }

    /// Size of a batch in this unit.
    pub fn count(self, buffers: &[Buffer]) -> u64 {
        match self {
            Self::Buffers => buffers.len() as u64,
            Self::Bytes => buffers.iter().map(|b| b.len() as u64).sum(),
        }
    }

    /// Split a batch so the head holds exactly `at` units (or the whole
    /// batch, if it holds fewer).
    ///
    /// In byte units the boundary may land inside a buffer; the buffer is
    /// split zero-copy at that offset.
    pub fn split(self, mut batch: Vec<Buffer>, at: u64) -> (Vec<Buffer>, Vec<Buffer>) {
        match self {
            Self::Buffers => {
                let at = (at as usize).min(batch.len());
                let tail = batch.split_off(at);
                (batch, tail)
            }
            Self::Bytes => {
                let mut head = Vec::new();
                let mut remaining = at;
                let mut iter = batch.into_iter();
                while remaining > 0 {
                    let Some(mut buffer) = iter.next() else { break };
                    let len = buffer.len() as u64;
                    if len <= remaining {
                        remaining -= len;
                        head.push(buffer);
                    } else {
                        let front = buffer.split_to(remaining as usize);
                        head.push(front);
                        let mut tail = vec![buffer];
                        tail.extend(iter);
                        return (head, tail);
                    }
                }
                (head, iter.collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(sizes: &[usize]) -> Vec<Buffer> {
        sizes
            .iter()
            .map(|&n| Buffer::from_payload(vec![0u8; n]))
            .collect()
    }

    #[test]
    fn test_count() {
        let b = batch(&[10, 20, 30]);
        assert_eq!(DemandUnit::Buffers.count(&b), 3);
        assert_eq!(DemandUnit::Bytes.count(&b), 60);
    }

    #[test]
    fn test_split_buffers() {
        let (head, tail) = DemandUnit::Buffers.split(batch(&[1, 2, 3]), 2);
        assert_eq!(head.len(), 2);
        assert_eq!(tail.len(), 1);

        // Splitting past the end takes everything.
        let (head, tail) = DemandUnit::Buffers.split(batch(&[1, 2]), 5);
        assert_eq!(head.len(), 2);
        assert!(tail.is_empty());
    }

    #[test]
    fn test_split_bytes_at_boundary() {
        let (head, tail) = DemandUnit::Bytes.split(batch(&[10, 20, 30]), 30);
        assert_eq!(DemandUnit::Bytes.count(&head), 30);
        assert_eq!(head.len(), 2);
        assert_eq!(DemandUnit::Bytes.count(&tail), 30);
    }

    #[test]
    fn test_split_bytes_inside_buffer() {
        let (head, tail) = DemandUnit::Bytes.split(batch(&[10, 20]), 15);
        assert_eq!(DemandUnit::Bytes.count(&head), 15);
        assert_eq!(head.len(), 2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].len(), 15);
    }

    #[test]
    fn test_split_concat_identity() {
        let original = batch(&[4, 8, 12]);
        let total: Vec<u8> = original
            .iter()
            .flat_map(|b| b.payload().to_vec())
            .collect();
        for at in 0..=24 {
            let (head, tail) = DemandUnit::Bytes.split(original.clone(), at);
            let rejoined: Vec<u8> = head
                .iter()
                .chain(tail.iter())
                .flat_map(|b| b.payload().to_vec())
                .collect();
            assert_eq!(rejoined, total);
        }
    }
}
