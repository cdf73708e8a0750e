//! The output-side demand controller.
//!
//! Demands arrive on output pads as credit from downstream. For a plain
//! pull source the controller accumulates credit and invokes the
//! `handle_demand` callback; for an auto-demand filter it instead keeps the
//! upstream credit of the demand-linked inputs topped up, so data keeps
//! arriving and the filter's process callback does the producing.

use crate::element::action::CallbackKind;
use crate::element::runtime::Core;
use crate::error::{Error, Result};
use crate::message::DemandSender;
use crate::pad::{PadMode, PadRef};

impl Core {
    /// Entry point for a `demand` message on an output pad.
    pub(crate) fn handle_incoming_demand(&mut self, pad: PadRef, size: u64) -> Result<()> {
        let data = self.pads.get_mut(&pad)?;
        if !data.is_output() {
            return Err(Error::InvalidMessage {
                message: "demand",
                pad: pad.clone(),
                mode: data.mode.as_str(),
            });
        }
        if data.mode == PadMode::Push {
            // Push outputs produce spontaneously; stray demands are noise.
            tracing::trace!(element = %self.name, pad = %pad, "demand ignored on push output");
            return Ok(());
        }

        data.demand += size as i64;

        let demand_inputs = self.pads.demand_linked_inputs(&pad);
        if !demand_inputs.is_empty() {
            return self.replenish_auto_demand(&demand_inputs);
        }

        self.pending_redemands.push_back(pad);
        self.flush_redemands()
    }

    /// The auto-demand coupling: top up an input's upstream credit only
    /// when it has fallen to half its preferred size *and* every other
    /// demand-linked input still has credit outstanding. Inputs that
    /// disagree beyond that stay as they are until the next demand.
    fn replenish_auto_demand(&mut self, inputs: &[PadRef]) -> Result<()> {
        for input in inputs {
            let data = self.pads.get(input)?;
            let preferred = data.preferred_size();
            if data.demand > (preferred / 2) as i64 {
                continue;
            }
            let others_have_credit = inputs
                .iter()
                .filter(|other| *other != input)
                .all(|other| {
                    self.pads
                        .get(other)
                        .map(|d| d.demand > 0)
                        .unwrap_or(false)
                });
            if !others_have_credit {
                continue;
            }
            let Some(peer) = self.pads.get(input)?.peer.clone() else {
                continue;
            };
            DemandSender::new(peer.element, peer.pad).send(preferred);
            self.pads.get_mut(input)?.demand += preferred as i64;
            tracing::trace!(
                element = %self.name,
                pad = %input,
                size = preferred,
                "auto-demand replenished"
            );
        }
        Ok(())
    }

    /// Drain queued redemand requests, re-checking `demand > 0` and the
    /// end-of-stream flag before every `handle_demand` invocation. The
    /// callback may queue further redemands; the loop runs them until the
    /// predicate goes false everywhere.
    pub(crate) fn flush_redemands(&mut self) -> Result<()> {
        while let Some(pad) = self.pending_redemands.pop_front() {
            let data = self.pads.get(&pad)?;
            if !data.is_output() || data.mode != PadMode::Pull {
                return Err(Error::InvalidMessage {
                    message: "redemand",
                    pad: pad.clone(),
                    mode: data.mode.as_str(),
                });
            }
            if data.demand <= 0 || data.end_of_stream {
                continue;
            }
            let size = data.demand as u64;
            let unit = data.other_demand_unit.unwrap_or(data.demand_unit);
            self.invoke_raw(CallbackKind::Demand, |behavior, ctx| {
                behavior.handle_demand(&pad, size, unit, ctx)
            })?;
        }
        Ok(())
    }
}
