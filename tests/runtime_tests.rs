//! Integration tests for the element runtime: playback lifecycle, message
//! deferral, linking, failure paths and a small end-to-end pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weir::buffer::{Buffer, Metadata};
use weir::element::{
    no_actions, start, CallbackResult, Context, ElementBehavior, ElementType, PlaybackState,
    StartOptions,
};
use weir::elements::{CollectSink, CountSource};
use weir::error::Error;
use weir::link;
use weir::message::{
    mailbox, monitor, parent_channel, ElementAddress, Message, MonitorGuard, ParentHandle,
    ParentMessage,
};
use weir::pad::{CapsSpec, DemandUnit, PadDirection, PadInfo, PadMode, PadRef, PadSpec};

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

struct Parent {
    handle: ParentHandle,
    guard: Option<MonitorGuard>,
    reports: Arc<Mutex<Vec<ParentMessage>>>,
}

/// A parent stand-in: collects every report an element sends.
fn spawn_parent() -> (Parent, weir::message::Monitor) {
    let (handle, rx) = parent_channel();
    let (guard, parent_monitor) = monitor();
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    tokio::spawn(async move {
        let rx = rx.to_async();
        while let Ok(message) = rx.recv().await {
            sink.lock().unwrap().push(message);
        }
    });
    (
        Parent {
            handle,
            guard: Some(guard),
            reports,
        },
        parent_monitor,
    )
}

/// A fake upstream element: answers the link handshake for its `output`
/// pad and hands every other message to the returned receiver.
fn fake_output_peer(mode: PadMode) -> (ElementAddress, kanal::Receiver<Message>) {
    let (address, rx) = mailbox("fake-upstream");
    let (seen_tx, seen_rx) = kanal::unbounded();
    tokio::spawn(async move {
        let rx = rx.to_async();
        while let Ok(message) = rx.recv().await {
            match message {
                Message::GetPadRef { name, reply } => {
                    let _ = reply.send(Ok(PadRef::from_name(name)));
                }
                Message::PeerLink { pad, reply, .. } => {
                    let _ = reply.send(Ok(PadInfo {
                        pad,
                        direction: PadDirection::Output,
                        mode,
                        demand_unit: DemandUnit::Buffers,
                        accepted_caps: CapsSpec::any(),
                    }));
                }
                other => {
                    if seen_tx.send(other).is_err() {
                        break;
                    }
                }
            }
        }
    });
    (address, seen_rx)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

fn states(reports: &Arc<Mutex<Vec<ParentMessage>>>) -> Vec<PlaybackState> {
    reports
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            ParentMessage::PlaybackStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

fn errors(reports: &Arc<Mutex<Vec<ParentMessage>>>) -> Vec<String> {
    reports
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            ParentMessage::ElementError { error, .. } => Some(error.to_string()),
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------
// Playback
// ----------------------------------------------------------------------

#[tokio::test]
async fn playback_walks_adjacent_states_and_reports() {
    let (parent, parent_monitor) = spawn_parent();
    let element = start(
        CountSource::new(0, 1),
        StartOptions::new("source", parent.handle.clone(), parent_monitor),
    )
    .unwrap();

    element.change_playback_state(PlaybackState::Playing).unwrap();
    wait_until(|| states(&parent.reports).len() == 2).await;

    // Stopped → Playing passes through Prepared, never skipping.
    assert_eq!(
        states(&parent.reports),
        vec![PlaybackState::Prepared, PlaybackState::Playing]
    );

    element.change_playback_state(PlaybackState::Stopped).unwrap();
    wait_until(|| states(&parent.reports).len() == 4).await;
    assert_eq!(
        states(&parent.reports),
        vec![
            PlaybackState::Prepared,
            PlaybackState::Playing,
            PlaybackState::Prepared,
            PlaybackState::Stopped
        ]
    );
}

#[tokio::test]
async fn deferred_buffers_replay_once_in_order() {
    let (parent, parent_monitor) = spawn_parent();
    let behavior = CollectSink::new(10);
    let collected = behavior.collected();
    let process_calls = behavior.process_calls();
    let sink = start(
        behavior,
        StartOptions::new("sink", parent.handle.clone(), parent_monitor),
    )
    .unwrap();

    let (upstream, _seen) = fake_output_peer(PadMode::Pull);
    let input_ref = link::get_pad_ref(sink.address(), "input").await.unwrap();
    link::link_refs(
        &upstream,
        PadRef::from_name("output"),
        sink.address(),
        input_ref.clone(),
    )
    .await
    .unwrap();

    // Everything below rides the same mailbox, so ordering is exact:
    // prepare, two buffers (deferred), then play.
    sink.change_playback_state(PlaybackState::Prepared).unwrap();
    let b1 = Buffer::new(&b"one"[..], Metadata::from_sequence(1));
    let b2 = Buffer::new(&b"two"[..], Metadata::from_sequence(2));
    sink.address()
        .send(Message::Buffer {
            pad: input_ref.clone(),
            buffers: vec![b1],
        })
        .unwrap();
    sink.address()
        .send(Message::Buffer {
            pad: input_ref.clone(),
            buffers: vec![b2],
        })
        .unwrap();
    sink.change_playback_state(PlaybackState::Playing).unwrap();

    wait_until(|| collected.lock().unwrap().len() == 2).await;

    // Both deferred buffers arrived through a single process callback,
    // in arrival order.
    assert_eq!(process_calls.load(Ordering::SeqCst), 1);
    let sequences: Vec<u64> = collected
        .lock()
        .unwrap()
        .iter()
        .map(|b| b.metadata().sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2]);
}

// ----------------------------------------------------------------------
// End to end
// ----------------------------------------------------------------------

#[tokio::test]
async fn pull_pipeline_delivers_everything_in_order() {
    let (parent, source_monitor) = spawn_parent();
    let (sink_parent, sink_monitor) = spawn_parent();

    let source = start(
        CountSource::new(25, 8),
        StartOptions::new("source", parent.handle.clone(), source_monitor),
    )
    .unwrap();
    let behavior = CollectSink::new(10);
    let collected = behavior.collected();
    let saw_eos = behavior.saw_eos();
    let sink = start(
        behavior,
        StartOptions::new("sink", sink_parent.handle.clone(), sink_monitor),
    )
    .unwrap();

    link::link(source.address(), "output", sink.address(), "input")
        .await
        .unwrap();
    link::finish_linking(source.address()).unwrap();
    link::finish_linking(sink.address()).unwrap();

    source.change_playback_state(PlaybackState::Playing).unwrap();
    sink.change_playback_state(PlaybackState::Playing).unwrap();

    wait_until(|| saw_eos.load(Ordering::SeqCst)).await;

    let sequences: Vec<u64> = collected
        .lock()
        .unwrap()
        .iter()
        .map(|b| b.metadata().sequence)
        .collect();
    assert_eq!(sequences, (0..25).collect::<Vec<u64>>());
    assert!(errors(&parent.reports).is_empty());
    assert!(errors(&sink_parent.reports).is_empty());
}

// ----------------------------------------------------------------------
// Failure paths
// ----------------------------------------------------------------------

struct FailingPrepare;

impl ElementBehavior for FailingPrepare {
    fn handle_stopped_to_prepared(&mut self, _ctx: &Context<'_>) -> CallbackResult {
        Err(Error::callback("handle_stopped_to_prepared", "no resources"))
    }
}

#[tokio::test]
async fn callback_error_stops_element_and_reports() {
    let (parent, parent_monitor) = spawn_parent();
    let element = start(
        FailingPrepare,
        StartOptions::new("broken", parent.handle.clone(), parent_monitor),
    )
    .unwrap();

    element.change_playback_state(PlaybackState::Playing).unwrap();
    wait_until(|| !errors(&parent.reports).is_empty()).await;

    let errors = errors(&parent.reports);
    assert!(errors[0].contains("no resources"));
    // The failed transition never reported a reached state.
    assert!(states(&parent.reports).is_empty());
}

#[tokio::test]
async fn parent_crash_terminates_element() {
    let (mut parent, parent_monitor) = spawn_parent();
    let element = start(
        CountSource::new(0, 1),
        StartOptions::new("orphan", parent.handle.clone(), parent_monitor),
    )
    .unwrap();
    let address = element.address().clone();

    // The parent dies; the monitor trips and the element shuts down.
    parent.guard.take();
    wait_until(|| address.send(Message::LinkingFinished).is_err()).await;
}

struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ElementBehavior for ShutdownFlag {
    fn handle_shutdown(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn graceful_shutdown_runs_callback() {
    let (parent, parent_monitor) = spawn_parent();
    let flag = Arc::new(AtomicBool::new(false));
    let element = start(
        ShutdownFlag { flag: flag.clone() },
        StartOptions::new("quitter", parent.handle.clone(), parent_monitor),
    )
    .unwrap();

    element.shutdown(Duration::from_secs(1)).await.unwrap();
    assert!(flag.load(Ordering::SeqCst));
}

#[tokio::test]
async fn toilet_overflow_is_fatal() {
    let (parent, parent_monitor) = spawn_parent();
    let behavior = CollectSink::new(0).with_buffer_config(weir::pad::PullBufferConfig {
        preferred_size: Some(10),
        min_demand: None,
        toilet: None,
    });
    let sink = start(
        behavior,
        StartOptions::new("drowned", parent.handle.clone(), parent_monitor),
    )
    .unwrap();
    let address = sink.address().clone();

    // A push producer: the link arms the toilet (warn 20, fail 40).
    let (upstream, _seen) = fake_output_peer(PadMode::Push);
    let input_ref = link::get_pad_ref(sink.address(), "input").await.unwrap();
    link::link_refs(
        &upstream,
        PadRef::from_name("output"),
        sink.address(),
        input_ref.clone(),
    )
    .await
    .unwrap();

    sink.change_playback_state(PlaybackState::Playing).unwrap();
    let flood: Vec<Buffer> = (0..50)
        .map(|i| Buffer::new(vec![0u8; 4], Metadata::from_sequence(i)))
        .collect();
    address
        .send(Message::Buffer {
            pad: input_ref,
            buffers: flood,
        })
        .unwrap();

    wait_until(|| !errors(&parent.reports).is_empty()).await;
    assert!(errors(&parent.reports)[0].contains("toilet overflow"));
    // Fatal: the element task is gone.
    wait_until(|| address.send(Message::LinkingFinished).is_err()).await;
}

// ----------------------------------------------------------------------
// Linking
// ----------------------------------------------------------------------

struct PushSink;

impl ElementBehavior for PushSink {
    fn element_type(&self) -> ElementType {
        ElementType::Sink
    }

    fn pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::input("input").push()]
    }
}

#[tokio::test]
async fn pull_output_into_push_input_is_rejected() {
    let (parent, source_monitor) = spawn_parent();
    let (_sink_parent, sink_monitor) = spawn_parent();
    let source = start(
        CountSource::new(5, 1),
        StartOptions::new("source", parent.handle.clone(), source_monitor),
    )
    .unwrap();
    let sink = start(
        PushSink,
        StartOptions::new("sink", parent.handle.clone(), sink_monitor),
    )
    .unwrap();

    let error = link::link(source.address(), "output", sink.address(), "input")
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Link { .. }));
}

#[tokio::test]
async fn linking_twice_fails() {
    let (parent, sink_monitor) = spawn_parent();
    let sink = start(
        CollectSink::new(1),
        StartOptions::new("sink", parent.handle.clone(), sink_monitor),
    )
    .unwrap();

    let (upstream, _seen) = fake_output_peer(PadMode::Pull);
    let input_ref = link::get_pad_ref(sink.address(), "input").await.unwrap();
    link::link_refs(
        &upstream,
        PadRef::from_name("output"),
        sink.address(),
        input_ref.clone(),
    )
    .await
    .unwrap();

    let error = link::link_refs(
        &upstream,
        PadRef::from_name("output"),
        sink.address(),
        input_ref,
    )
    .await
    .unwrap_err();
    assert!(error.to_string().contains("already linked"));
}

struct RequestPads {
    added: Arc<Mutex<Vec<PadRef>>>,
    removed: Arc<Mutex<Vec<PadRef>>>,
}

impl ElementBehavior for RequestPads {
    fn pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::input("input").on_request()]
    }

    fn handle_pad_added(&mut self, pad: &PadRef, _ctx: &Context<'_>) -> CallbackResult {
        self.added.lock().unwrap().push(pad.clone());
        no_actions()
    }

    fn handle_pad_removed(&mut self, pad: &PadRef, _ctx: &Context<'_>) -> CallbackResult {
        self.removed.lock().unwrap().push(pad.clone());
        no_actions()
    }
}

#[tokio::test]
async fn on_request_pads_notify_after_linking_finished() {
    let (parent, parent_monitor) = spawn_parent();
    let added = Arc::new(Mutex::new(Vec::new()));
    let removed = Arc::new(Mutex::new(Vec::new()));
    let element = start(
        RequestPads {
            added: added.clone(),
            removed: removed.clone(),
        },
        StartOptions::new("mixer", parent.handle.clone(), parent_monitor),
    )
    .unwrap();

    let (upstream, _seen) = fake_output_peer(PadMode::Pull);
    let (output_ref, input_ref) = link::link(&upstream, "output", element.address(), "input")
        .await
        .unwrap();
    assert!(input_ref.is_dynamic());

    // No notification until the batch closes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(added.lock().unwrap().is_empty());

    link::finish_linking(element.address()).unwrap();
    wait_until(|| added.lock().unwrap().len() == 1).await;
    assert_eq!(added.lock().unwrap()[0], input_ref);

    link::unlink(&upstream, output_ref, element.address(), input_ref.clone()).unwrap();
    wait_until(|| removed.lock().unwrap().len() == 1).await;
    assert_eq!(removed.lock().unwrap()[0], input_ref);
}
