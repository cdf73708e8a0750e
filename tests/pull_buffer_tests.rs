//! Integration tests for the pull queue and its credit engine.
//!
//! These pin the externally observable flow-control contract:
//! - the initial demand and the coalescing rule after consumption
//! - toilet warn/fail thresholds for push-into-pull links
//! - boundary behavior of `take` around markers and batch splits

use std::sync::Arc;
use weir::buffer::{Buffer, Metadata};
use weir::event::Event;
use weir::message::{mailbox, DemandSender, Message};
use weir::pad::{DemandUnit, PadRef, PullBuffer, PullBufferConfig, QueueItem, TakeOutcome, Toilet};
use weir::Error;

fn buffers(count: u64) -> Vec<Buffer> {
    (0..count)
        .map(|i| Buffer::new(vec![0u8; 16], Metadata::from_sequence(i)))
        .collect()
}

fn new_pull_buffer(config: PullBufferConfig) -> (PullBuffer, kanal::Receiver<Message>) {
    let (upstream, rx) = mailbox("upstream");
    let pull_buffer = PullBuffer::new(
        Arc::from("consumer"),
        PadRef::from_name("input"),
        DemandSender::new(upstream, PadRef::from_name("output")),
        DemandUnit::Buffers,
        &config,
    );
    (pull_buffer, rx)
}

fn received_demands(rx: &kanal::Receiver<Message>) -> Vec<u64> {
    let mut sizes = Vec::new();
    while let Ok(Some(message)) = rx.try_recv() {
        if let Message::Demand { size, .. } = message {
            sizes.push(size);
        }
    }
    sizes
}

#[test]
fn demand_is_coalesced_after_consumption() {
    let (mut queue, rx) = new_pull_buffer(PullBufferConfig {
        preferred_size: Some(100),
        min_demand: Some(25),
        toilet: None,
    });

    // Construction issues the full preferred size upstream.
    assert_eq!(received_demands(&rx), vec![100]);

    queue.store(QueueItem::Buffers(buffers(100))).unwrap();
    assert_eq!(queue.current_size(), 100);

    // Taking 30 drops the size to 70; 70 < 100 and 30 > 0, so
    // max(30, 25) = 30 goes upstream and the counter returns to zero.
    let outcome = queue.take(30);
    assert!(matches!(outcome, TakeOutcome::Values(_)));
    assert_eq!(queue.current_size(), 70);
    assert_eq!(received_demands(&rx), vec![30]);
    assert_eq!(queue.demand(), 0);
}

#[test]
fn toilet_warns_then_overflows() {
    let (mut queue, rx) = new_pull_buffer(PullBufferConfig {
        preferred_size: None,
        min_demand: None,
        toilet: Some(Toilet {
            warn: 200,
            fail: 400,
        }),
    });

    // A toilet never issues demand; the producer is push-mode.
    assert!(received_demands(&rx).is_empty());

    queue.store(QueueItem::Buffers(buffers(150))).unwrap();
    queue.store(QueueItem::Buffers(buffers(100))).unwrap(); // 250: warn level crossed
    let error = queue
        .store(QueueItem::Buffers(buffers(200)))
        .unwrap_err(); // 450: fail level crossed

    match error {
        Error::ToiletOverflow { size, fail, .. } => {
            assert_eq!(size, 450);
            assert_eq!(fail, 400);
        }
        other => panic!("expected a toilet overflow, got {other}"),
    }
    assert!(received_demands(&rx).is_empty());
}

#[test]
fn take_zero_yields_markers_without_consuming_buffers() {
    let (mut queue, _rx) = new_pull_buffer(PullBufferConfig::default());

    queue.store(QueueItem::Event(Event::Discontinuity)).unwrap();
    queue.store(QueueItem::Buffers(buffers(4))).unwrap();

    let TakeOutcome::Empty(items) = queue.take(0) else {
        panic!("take(0) must not produce buffers");
    };
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], QueueItem::Event(Event::Discontinuity)));
    assert_eq!(queue.current_size(), 4);
}

#[test]
fn store_into_full_queue_keeps_data() {
    let (mut queue, _rx) = new_pull_buffer(PullBufferConfig {
        preferred_size: Some(4),
        min_demand: None,
        toilet: None,
    });

    // Overdelivery is a protocol violation but never loses data.
    queue.store(QueueItem::Buffers(buffers(4))).unwrap();
    queue.store(QueueItem::Buffers(buffers(4))).unwrap();
    assert_eq!(queue.current_size(), 8);

    let items = queue.take(8).into_items();
    let total: u64 = items
        .iter()
        .map(|item| match item {
            QueueItem::Buffers(batch) => batch.len() as u64,
            _ => 0,
        })
        .sum();
    assert_eq!(total, 8);
}

#[test]
fn split_then_concat_reproduces_the_batch() {
    let original = buffers(10);
    for at in 0..=10 {
        let (head, tail) = DemandUnit::Buffers.split(original.clone(), at);
        let rejoined: Vec<Buffer> = head.into_iter().chain(tail).collect();
        assert_eq!(rejoined, original);
    }
}

#[test]
fn byte_unit_splits_inside_a_buffer() {
    let (upstream, _rx) = mailbox("upstream");
    let mut queue = PullBuffer::new(
        Arc::from("consumer"),
        PadRef::from_name("input"),
        DemandSender::new(upstream, PadRef::from_name("output")),
        DemandUnit::Bytes,
        &PullBufferConfig {
            preferred_size: Some(1024),
            min_demand: None,
            toilet: None,
        },
    );

    // Two 16-byte buffers; taking 24 bytes splits the second one.
    queue
        .store(QueueItem::Buffers(buffers(2)))
        .unwrap();
    let items = queue.take(24).into_items();
    let QueueItem::Buffers(head) = &items[0] else {
        panic!("expected buffers");
    };
    assert_eq!(head.len(), 2);
    assert_eq!(head[0].len(), 16);
    assert_eq!(head[1].len(), 8);
    assert_eq!(queue.current_size(), 8);

    let items = queue.take(8).into_items();
    let QueueItem::Buffers(tail) = &items[0] else {
        panic!("expected buffers");
    };
    assert_eq!(tail[0].len(), 8);
}

#[test]
fn ordering_across_buffers_and_markers_survives_a_round_trip() {
    let (mut queue, _rx) = new_pull_buffer(PullBufferConfig::default());

    queue.store(QueueItem::Buffers(buffers(2))).unwrap();
    queue.store(QueueItem::Event(Event::Discontinuity)).unwrap();
    queue.store(QueueItem::Buffers(buffers(3))).unwrap();

    let items = queue.take(5).into_items();
    assert_eq!(items.len(), 3);
    assert!(matches!(&items[0], QueueItem::Buffers(b) if b.len() == 2));
    assert!(matches!(items[1], QueueItem::Event(Event::Discontinuity)));
    assert!(matches!(&items[2], QueueItem::Buffers(b) if b.len() == 3));
    assert!(queue.is_empty());
}
