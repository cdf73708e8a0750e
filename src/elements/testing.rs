//! Test source/filter/sink elements.
//!
//! - [`CountSource`]: produces numbered buffers against demand
//! - [`PassThrough`]: auto-demand filter forwarding everything
//! - [`CollectSink`]: pulls buffers and collects them for inspection

use crate::buffer::{Buffer, Metadata};
use crate::element::{
    no_actions, Action, CallbackResult, Context, ElementBehavior, ElementType, ForwardItem,
};
use crate::event::Event;
use crate::pad::{DemandUnit, PadRef, PadSpec, PullBufferConfig};
use smallvec::smallvec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A pull source producing `total` numbered buffers, then end-of-stream.
pub struct CountSource {
    total: u64,
    produced: u64,
    payload_len: usize,
}

impl CountSource {
    /// Create a source producing `total` buffers of `payload_len` bytes.
    pub fn new(total: u64, payload_len: usize) -> Self {
        Self {
            total,
            produced: 0,
            payload_len,
        }
    }
}

impl ElementBehavior for CountSource {
    fn element_type(&self) -> ElementType {
        ElementType::Source
    }

    fn pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::output("output")]
    }

    fn handle_demand(
        &mut self,
        pad: &PadRef,
        size: u64,
        _unit: DemandUnit,
        _ctx: &Context<'_>,
    ) -> CallbackResult {
        let mut actions = smallvec![];
        let count = size.min(self.total - self.produced);
        if count > 0 {
            let buffers: Vec<Buffer> = (0..count)
                .map(|i| {
                    Buffer::new(
                        vec![0u8; self.payload_len],
                        Metadata::from_sequence(self.produced + i),
                    )
                })
                .collect();
            self.produced += count;
            actions.push(Action::Buffer {
                pad: pad.clone(),
                buffers,
            });
        }
        if self.produced == self.total {
            actions.push(Action::EndOfStream { pad: pad.clone() });
        }
        Ok(actions)
    }
}

/// An auto-demand filter forwarding buffers and events unchanged.
pub struct PassThrough;

impl ElementBehavior for PassThrough {
    fn pads(&self) -> Vec<PadSpec> {
        vec![
            PadSpec::input("input"),
            PadSpec::output("output").with_demand_pads(["input"]),
        ]
    }

    fn handle_process(
        &mut self,
        _pad: &PadRef,
        buffers: Vec<Buffer>,
        _ctx: &Context<'_>,
    ) -> CallbackResult {
        Ok(smallvec![Action::Buffer {
            pad: PadRef::from_name("output"),
            buffers,
        }])
    }

    fn handle_event(&mut self, pad: &PadRef, event: &Event, _ctx: &Context<'_>) -> CallbackResult {
        // Downstream needs stream boundaries too; start-of-stream is
        // emitted implicitly with the first forwarded buffer.
        if event.is_end_of_stream() && pad.name() == "input" {
            Ok(smallvec![Action::Forward(ForwardItem::Event(
                Event::EndOfStream
            ))])
        } else {
            no_actions()
        }
    }
}

/// A pull sink collecting everything it receives.
pub struct CollectSink {
    batch: u64,
    buffer_config: PullBufferConfig,
    collected: Arc<Mutex<Vec<Buffer>>>,
    saw_eos: Arc<AtomicBool>,
    process_calls: Arc<AtomicU64>,
}

impl CollectSink {
    /// Create a sink demanding `batch` buffers at a time.
    pub fn new(batch: u64) -> Self {
        Self {
            batch,
            buffer_config: PullBufferConfig::default(),
            collected: Arc::new(Mutex::new(Vec::new())),
            saw_eos: Arc::new(AtomicBool::new(false)),
            process_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Override the input queue configuration.
    pub fn with_buffer_config(mut self, config: PullBufferConfig) -> Self {
        self.buffer_config = config;
        self
    }

    /// Shared handle to the collected buffers.
    pub fn collected(&self) -> Arc<Mutex<Vec<Buffer>>> {
        self.collected.clone()
    }

    /// Shared flag set once end-of-stream arrives.
    pub fn saw_eos(&self) -> Arc<AtomicBool> {
        self.saw_eos.clone()
    }

    /// Shared counter of process-callback invocations.
    pub fn process_calls(&self) -> Arc<AtomicU64> {
        self.process_calls.clone()
    }
}

impl ElementBehavior for CollectSink {
    fn element_type(&self) -> ElementType {
        ElementType::Sink
    }

    fn pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::input("input").with_buffer(self.buffer_config.clone())]
    }

    fn handle_prepared_to_playing(&mut self, _ctx: &Context<'_>) -> CallbackResult {
        Ok(smallvec![Action::Demand {
            pad: PadRef::from_name("input"),
            size: self.batch,
        }])
    }

    fn handle_process(
        &mut self,
        pad: &PadRef,
        buffers: Vec<Buffer>,
        _ctx: &Context<'_>,
    ) -> CallbackResult {
        let consumed = buffers.len() as u64;
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        self.collected.lock().unwrap().extend(buffers);
        // Keep the pipeline flowing: re-demand what was just consumed.
        Ok(smallvec![Action::Demand {
            pad: pad.clone(),
            size: consumed,
        }])
    }

    fn handle_event(&mut self, _pad: &PadRef, event: &Event, _ctx: &Context<'_>) -> CallbackResult {
        if event.is_end_of_stream() {
            self.saw_eos.store(true, Ordering::SeqCst);
        }
        no_actions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Actions;
    use crate::pad::PadsState;

    fn ctx_for<'a>(name: &'a str, pads: &'a PadsState) -> Context<'a> {
        Context::new(name, crate::element::PlaybackState::Playing, pads)
    }

    #[test]
    fn test_count_source_respects_demand_and_total() {
        let mut source = CountSource::new(5, 8);
        let pads = PadsState::new(Arc::from("src"), source.pads()).unwrap();
        let ctx = ctx_for("src", &pads);
        let pad = PadRef::from_name("output");

        let actions: Actions = source
            .handle_demand(&pad, 3, DemandUnit::Buffers, &ctx)
            .unwrap();
        assert_eq!(actions.len(), 1);
        let Action::Buffer { buffers, .. } = &actions[0] else {
            panic!("expected buffers");
        };
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[2].metadata().sequence, 2);

        // Second demand exhausts the source and closes the stream.
        let actions = source
            .handle_demand(&pad, 10, DemandUnit::Buffers, &ctx)
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[1], Action::EndOfStream { .. }));
    }

    #[test]
    fn test_collect_sink_re_demands() {
        let mut sink = CollectSink::new(4);
        let collected = sink.collected();
        let pads = PadsState::new(Arc::from("sink"), sink.pads()).unwrap();
        let ctx = ctx_for("sink", &pads);
        let pad = PadRef::from_name("input");

        let buffers = vec![Buffer::from_payload(vec![0u8; 2]); 3];
        let actions = sink.handle_process(&pad, buffers, &ctx).unwrap();
        assert_eq!(collected.lock().unwrap().len(), 3);
        let Action::Demand { size, .. } = &actions[0] else {
            panic!("expected a demand");
        };
        assert_eq!(*size, 3);
    }
}
