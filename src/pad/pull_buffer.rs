//! The pull-mode input queue and its credit engine.
//!
//! A `PullBuffer` sits behind every self-driven pull input pad. It keeps
//! buffers, events and caps in arrival order, tracks its fill level in the
//! pad's demand unit, and issues credit upstream so that the producer never
//! outruns the consumer by more than `preferred_size`.
//!
//! When a push producer feeds a pull consumer there is no credit to issue;
//! the queue switches into *toilet* mode and merely watches the water level,
//! warning at one threshold and failing the element at another.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::DemandSender;
use crate::pad::{DemandUnit, PadRef};
use std::collections::VecDeque;
use std::sync::Arc;

/// An entry stored in (or taken from) a pull buffer.
#[derive(Debug, Clone)]
pub enum QueueItem {
    /// A batch of buffers.
    Buffers(Vec<Buffer>),
    /// An in-order event marker.
    Event(Event),
    /// An in-order caps marker.
    Caps(Caps),
}

impl QueueItem {
    /// Whether this item carries buffers.
    pub fn is_buffers(&self) -> bool {
        matches!(self, Self::Buffers(_))
    }
}

/// Internal record; buffer batches cache their size in the pad's unit.
#[derive(Debug)]
enum Record {
    Buffers { buffers: Vec<Buffer>, size: u64 },
    Event(Event),
    Caps(Caps),
}

/// What a `take` produced.
#[derive(Debug)]
pub enum TakeOutcome {
    /// At least one buffer was produced (markers may surround it).
    Values(Vec<QueueItem>),
    /// Only non-buffer markers were available.
    Empty(Vec<QueueItem>),
}

impl TakeOutcome {
    /// The items, regardless of outcome.
    pub fn items(&self) -> &[QueueItem] {
        match self {
            Self::Values(items) | Self::Empty(items) => items,
        }
    }

    /// Consume into the items.
    pub fn into_items(self) -> Vec<QueueItem> {
        match self {
            Self::Values(items) | Self::Empty(items) => items,
        }
    }
}

/// Overflow thresholds for a pull input fed by a push producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toilet {
    /// Queue size at which a warning is logged.
    pub warn: u64,
    /// Queue size at which the element fails.
    pub fail: u64,
}

/// Per-pad queue configuration.
#[derive(Debug, Clone, Default)]
pub struct PullBufferConfig {
    /// Target fill level; defaults from the demand unit.
    pub preferred_size: Option<u64>,
    /// Smallest demand worth sending; defaults to `preferred_size / 4`.
    pub min_demand: Option<u64>,
    /// Arm the overflow detector from the start.
    pub toilet: Option<Toilet>,
}

/// In-order queue for a pull input pad, issuing credit upstream.
#[derive(Debug)]
pub struct PullBuffer {
    /// Owning element's name, for log lines.
    element: Arc<str>,
    pad: PadRef,
    upstream: DemandSender,
    unit: DemandUnit,
    queue: VecDeque<Record>,
    preferred_size: u64,
    min_demand: u64,
    current_size: u64,
    /// Units consumed but not yet re-demanded. Signed: the demand
    /// controller may drive it below zero transiently.
    demand: i64,
    toilet: Option<Toilet>,
    toilet_warned: bool,
}

impl PullBuffer {
    /// Build a pull buffer and, unless in toilet mode, issue the initial
    /// demand of `preferred_size` upstream.
    pub fn new(
        element: Arc<str>,
        pad: PadRef,
        upstream: DemandSender,
        unit: DemandUnit,
        config: &PullBufferConfig,
    ) -> Self {
        let preferred_size = config
            .preferred_size
            .unwrap_or_else(|| unit.default_preferred_size());
        let min_demand = config.min_demand.unwrap_or((preferred_size / 4).max(1));
        let mut this = Self {
            element,
            pad,
            upstream,
            unit,
            queue: VecDeque::new(),
            preferred_size,
            min_demand,
            current_size: 0,
            demand: 0,
            toilet: config.toilet,
            toilet_warned: false,
        };
        if this.toilet.is_none() {
            this.demand = preferred_size as i64;
            this.send_demands();
        }
        this
    }

    /// Append an item, preserving order with everything already queued.
    ///
    /// Outside toilet mode a store never fails; delivering into an already
    /// full queue is an upstream protocol violation and is logged, but the
    /// data is kept. In toilet mode, reaching the fail level returns
    /// [`Error::ToiletOverflow`].
    pub fn store(&mut self, item: QueueItem) -> Result<()> {
        match item {
            QueueItem::Buffers(buffers) => {
                let size = self.unit.count(&buffers);
                if let Some(toilet) = self.toilet {
                    self.current_size += size;
                    self.queue.push_back(Record::Buffers { buffers, size });
                    if self.current_size >= toilet.fail {
                        return Err(Error::ToiletOverflow {
                            pad: self.pad.clone(),
                            size: self.current_size,
                            fail: toilet.fail,
                        });
                    }
                    if self.current_size >= toilet.warn && !self.toilet_warned {
                        self.toilet_warned = true;
                        tracing::warn!(
                            element = %self.element,
                            pad = %self.pad,
                            size = self.current_size,
                            warn_level = toilet.warn,
                            "push producer is outrunning pull consumer"
                        );
                    }
                } else {
                    if self.current_size >= self.preferred_size {
                        tracing::warn!(
                            element = %self.element,
                            pad = %self.pad,
                            size = self.current_size,
                            preferred = self.preferred_size,
                            "buffers delivered beyond issued demand"
                        );
                    }
                    self.current_size += size;
                    self.queue.push_back(Record::Buffers { buffers, size });
                }
            }
            QueueItem::Event(event) => self.queue.push_back(Record::Event(event)),
            QueueItem::Caps(caps) => self.queue.push_back(Record::Caps(caps)),
        }
        Ok(())
    }

    /// Pop up to `count` units, splitting a batch at a unit boundary when
    /// the boundary lands inside it. Markers before and immediately after
    /// the taken buffers come along, so in-band order is preserved, and
    /// adjacent batches coalesce so the consumer sees one contiguous run
    /// of buffers per item.
    ///
    /// Consumed units are re-demanded upstream per the credit algorithm.
    pub fn take(&mut self, count: u64) -> TakeOutcome {
        let mut items: Vec<QueueItem> = Vec::new();
        let mut taken = 0u64;

        fn push_buffers(items: &mut Vec<QueueItem>, buffers: Vec<Buffer>) {
            match items.last_mut() {
                Some(QueueItem::Buffers(run)) => run.extend(buffers),
                _ => items.push(QueueItem::Buffers(buffers)),
            }
        }

        while taken < count {
            match self.queue.pop_front() {
                None => break,
                Some(Record::Event(event)) => items.push(QueueItem::Event(event)),
                Some(Record::Caps(caps)) => items.push(QueueItem::Caps(caps)),
                Some(Record::Buffers { buffers, size }) => {
                    let wanted = count - taken;
                    if size <= wanted {
                        taken += size;
                        push_buffers(&mut items, buffers);
                    } else {
                        let (head, tail) = self.unit.split(buffers, wanted);
                        let head_size = self.unit.count(&head);
                        taken += head_size;
                        push_buffers(&mut items, head);
                        self.queue.push_front(Record::Buffers {
                            buffers: tail,
                            size: size - head_size,
                        });
                    }
                }
            }
        }

        // Markers that immediately follow the taken buffers belong to this
        // take; the next buffer record does not.
        while matches!(self.queue.front(), Some(Record::Event(_) | Record::Caps(_))) {
            match self.queue.pop_front() {
                Some(Record::Event(event)) => items.push(QueueItem::Event(event)),
                Some(Record::Caps(caps)) => items.push(QueueItem::Caps(caps)),
                _ => unreachable!(),
            }
        }

        debug_assert!(taken <= self.current_size, "pull buffer size accounting broke");
        self.current_size -= taken;
        self.handle_demand(taken);

        if items.iter().any(QueueItem::is_buffers) {
            TakeOutcome::Values(items)
        } else {
            TakeOutcome::Empty(items)
        }
    }

    /// Credit algorithm: fold consumed units into the demand counter and
    /// forward a demand upstream when the queue has room and the counter
    /// is worth flushing.
    fn handle_demand(&mut self, consumed: u64) {
        if self.toilet.is_some() {
            return;
        }
        self.demand += consumed as i64;
        self.send_demands();
    }

    fn send_demands(&mut self) {
        if self.current_size < self.preferred_size && self.demand > 0 {
            let to_demand = self.demand.max(self.min_demand as i64) as u64;
            self.upstream.send(to_demand);
            self.demand -= to_demand as i64;
        }
    }

    /// Switch into toilet mode. Idempotent; a no-op if already armed.
    pub fn enable_toilet(&mut self, toilet: Toilet) {
        if self.toilet.is_none() {
            self.toilet = Some(toilet);
            self.demand = 0;
        }
    }

    /// Whether the overflow detector is armed.
    pub fn is_toilet(&self) -> bool {
        self.toilet.is_some()
    }

    /// True iff no buffer units are queued (markers do not count).
    pub fn is_empty(&self) -> bool {
        self.current_size == 0
    }

    /// Whether the queue holds nothing at all, markers included.
    pub fn has_no_records(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current fill level, in the pad's demand unit.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// The target fill level.
    pub fn preferred_size(&self) -> u64 {
        self.preferred_size
    }

    /// Consumed-but-not-redemanded units.
    pub fn demand(&self) -> i64 {
        self.demand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, mailbox};

    fn test_buffers(count: usize) -> Vec<Buffer> {
        (0..count)
            .map(|i| Buffer::new(vec![0u8; 4], crate::buffer::Metadata::from_sequence(i as u64)))
            .collect()
    }

    fn pull_buffer(
        config: &PullBufferConfig,
    ) -> (PullBuffer, kanal::Receiver<Message>) {
        let (addr, rx) = mailbox("upstream");
        let pb = PullBuffer::new(
            Arc::from("consumer"),
            PadRef::from_name("input"),
            DemandSender::new(addr, PadRef::from_name("output")),
            DemandUnit::Buffers,
            config,
        );
        (pb, rx)
    }

    fn demand_sizes(rx: &kanal::Receiver<Message>) -> Vec<u64> {
        let mut sizes = Vec::new();
        while let Ok(Some(msg)) = rx.try_recv() {
            if let Message::Demand { size, .. } = msg {
                sizes.push(size);
            }
        }
        sizes
    }

    #[test]
    fn test_initial_demand() {
        let (pb, rx) = pull_buffer(&PullBufferConfig {
            preferred_size: Some(100),
            min_demand: Some(25),
            toilet: None,
        });
        assert_eq!(demand_sizes(&rx), vec![100]);
        assert_eq!(pb.demand(), 0);
        assert!(pb.is_empty());
    }

    #[test]
    fn test_demand_coalescing_after_take() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig {
            preferred_size: Some(100),
            min_demand: Some(25),
            toilet: None,
        });
        assert_eq!(demand_sizes(&rx), vec![100]);

        pb.store(QueueItem::Buffers(test_buffers(100))).unwrap();
        assert_eq!(pb.current_size(), 100);

        let outcome = pb.take(30);
        assert!(matches!(outcome, TakeOutcome::Values(_)));
        assert_eq!(pb.current_size(), 70);
        // 70 < 100 and 30 > 0, so max(30, 25) = 30 goes upstream.
        assert_eq!(demand_sizes(&rx), vec![30]);
        assert_eq!(pb.demand(), 0);
    }

    #[test]
    fn test_small_take_waits_for_min_demand() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig {
            preferred_size: Some(100),
            min_demand: Some(25),
            toilet: None,
        });
        demand_sizes(&rx);

        pb.store(QueueItem::Buffers(test_buffers(100))).unwrap();
        pb.take(10);
        // 10 > 0 but max(10, 25) = 25 is sent: min_demand floors the size.
        assert_eq!(demand_sizes(&rx), vec![25]);
        assert_eq!(pb.demand(), 10 - 25);
    }

    #[test]
    fn test_no_demand_when_full() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig {
            preferred_size: Some(10),
            min_demand: Some(2),
            toilet: None,
        });
        demand_sizes(&rx);

        // Overdeliver: 30 buffers against a preferred size of 10.
        pb.store(QueueItem::Buffers(test_buffers(30))).unwrap();
        pb.take(5);
        // current_size 25 >= preferred 10: consumed credit is withheld.
        assert!(demand_sizes(&rx).is_empty());
        assert_eq!(pb.demand(), 5);
    }

    #[test]
    fn test_take_preserves_marker_order() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig::default());
        demand_sizes(&rx);

        pb.store(QueueItem::Event(Event::StartOfStream)).unwrap();
        pb.store(QueueItem::Buffers(test_buffers(2))).unwrap();
        pb.store(QueueItem::Event(Event::Discontinuity)).unwrap();
        pb.store(QueueItem::Buffers(test_buffers(2))).unwrap();

        let items = pb.take(2).into_items();
        // Leading marker, the buffers, and the marker right after them.
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], QueueItem::Event(Event::StartOfStream)));
        assert!(items[1].is_buffers());
        assert!(matches!(items[2], QueueItem::Event(Event::Discontinuity)));
        assert_eq!(pb.current_size(), 2);
    }

    #[test]
    fn test_take_zero_drains_only_markers() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig::default());
        demand_sizes(&rx);

        pb.store(QueueItem::Event(Event::StartOfStream)).unwrap();
        pb.store(QueueItem::Buffers(test_buffers(3))).unwrap();

        let outcome = pb.take(0);
        let TakeOutcome::Empty(items) = outcome else {
            panic!("take(0) must not produce buffers");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(pb.current_size(), 3);
    }

    #[test]
    fn test_take_splits_batch() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig::default());
        demand_sizes(&rx);

        pb.store(QueueItem::Buffers(test_buffers(10))).unwrap();
        let items = pb.take(4).into_items();
        let QueueItem::Buffers(head) = &items[0] else {
            panic!("expected buffers");
        };
        assert_eq!(head.len(), 4);
        assert_eq!(head[0].metadata().sequence, 0);
        assert_eq!(pb.current_size(), 6);

        // The remainder continues where the head stopped.
        let items = pb.take(100).into_items();
        let QueueItem::Buffers(tail) = &items[0] else {
            panic!("expected buffers");
        };
        assert_eq!(tail.len(), 6);
        assert_eq!(tail[0].metadata().sequence, 4);
    }

    #[test]
    fn test_toilet_warn_then_fail() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig {
            preferred_size: Some(100),
            min_demand: None,
            toilet: Some(Toilet {
                warn: 200,
                fail: 400,
            }),
        });
        // Toilet mode never demands.
        assert!(demand_sizes(&rx).is_empty());

        pb.store(QueueItem::Buffers(test_buffers(150))).unwrap();
        pb.store(QueueItem::Buffers(test_buffers(100))).unwrap(); // 250: warns
        let err = pb
            .store(QueueItem::Buffers(test_buffers(200)))
            .unwrap_err(); // 450: fails
        match err {
            Error::ToiletOverflow { size, fail, .. } => {
                assert_eq!(size, 450);
                assert_eq!(fail, 400);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(demand_sizes(&rx).is_empty());
    }

    #[test]
    fn test_enable_toilet_is_idempotent() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig::default());
        demand_sizes(&rx);

        pb.enable_toilet(Toilet { warn: 5, fail: 10 });
        pb.enable_toilet(Toilet {
            warn: 9999,
            fail: 99999,
        });
        assert!(pb.is_toilet());

        // The first thresholds stick.
        pb.store(QueueItem::Buffers(test_buffers(9))).unwrap();
        assert!(pb.store(QueueItem::Buffers(test_buffers(2))).is_err());
    }

    #[test]
    fn test_adjacent_batches_coalesce() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig::default());
        demand_sizes(&rx);

        pb.store(QueueItem::Buffers(test_buffers(1))).unwrap();
        pb.store(QueueItem::Buffers(test_buffers(1))).unwrap();

        // Two adjacent batches come out as one contiguous run.
        let items = pb.take(2).into_items();
        assert_eq!(items.len(), 1);
        let QueueItem::Buffers(run) = &items[0] else {
            panic!("expected buffers");
        };
        assert_eq!(run.len(), 2);
    }

    #[test]
    fn test_store_take_round_trip() {
        let (mut pb, rx) = pull_buffer(&PullBufferConfig::default());
        demand_sizes(&rx);

        pb.store(QueueItem::Buffers(test_buffers(5))).unwrap();
        let items = pb.take(5).into_items();
        let QueueItem::Buffers(out) = &items[0] else {
            panic!("expected buffers");
        };
        let sequences: Vec<u64> = out.iter().map(|b| b.metadata().sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert!(pb.is_empty());
    }
}
