//! Pads: the typed, directional endpoints of an element.
//!
//! An element declares its pads statically as [`PadSpec`]s; at runtime each
//! live pad is a [`PadData`] entry in the element's [`PadsState`], keyed by
//! [`PadRef`]. Always-available pads exist from element start; on-request
//! pads come to life during link negotiation and get a fresh
//! `(name, generation)` reference per instance.
//!
//! Linking is where the typing pays off: direction, mode, demand unit and
//! accepted caps of both ends are checked before a peer is recorded, and a
//! pull input builds its [`PullBuffer`] the moment it learns who feeds it.

mod metric;
mod pull_buffer;

pub use metric::DemandUnit;
pub use pull_buffer::{PullBuffer, PullBufferConfig, QueueItem, TakeOutcome, Toilet};

pub use crate::caps::CapsSpec;
use crate::caps::Caps;
use crate::error::{Error, Result};
use crate::message::{DemandSender, Endpoint, Message};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Receives data from upstream.
    Input,
    /// Sends data downstream.
    Output,
}

impl PadDirection {
    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

/// How data flows through a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Data flows whenever the producer has it.
    Push,
    /// Data flows only against previously issued credit.
    #[default]
    Pull,
}

impl PadMode {
    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

/// Whether a pad exists from element start or is created per link request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadAvailability {
    /// Exactly one instance, present from element start.
    #[default]
    Always,
    /// Instances are created on request during linking.
    OnRequest,
}

// ============================================================================
// PadRef
// ============================================================================

/// Identifier of a live pad instance.
///
/// Static pads are identified by their declared name; on-request pads by
/// the name plus a generation allocated when the instance was requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PadRef {
    /// A static pad; the ref is the declared name.
    Static(Arc<str>),
    /// An instance of an on-request pad.
    Dynamic(Arc<str>, u32),
}

impl PadRef {
    /// Reference a static pad by name.
    pub fn from_name(name: impl Into<Arc<str>>) -> Self {
        Self::Static(name.into())
    }

    /// The declared pad name this ref belongs to.
    pub fn name(&self) -> &str {
        match self {
            Self::Static(name) | Self::Dynamic(name, _) => name,
        }
    }

    /// Whether this is an on-request pad instance.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(..))
    }
}

impl fmt::Display for PadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(name) => f.write_str(name),
            Self::Dynamic(name, generation) => write!(f, "{name}:{generation}"),
        }
    }
}

// ============================================================================
// PadSpec
// ============================================================================

/// Static declaration of a pad, part of an element's behavior.
#[derive(Debug, Clone)]
pub struct PadSpec {
    /// Declared name.
    pub name: Arc<str>,
    /// Direction.
    pub direction: PadDirection,
    /// Flow mode.
    pub mode: PadMode,
    /// Availability.
    pub availability: PadAvailability,
    /// Unit demand is counted in.
    pub demand_unit: DemandUnit,
    /// Constraint on the caps this pad accepts.
    pub accepted_caps: CapsSpec,
    /// Queue configuration for pull inputs.
    pub buffer: PullBufferConfig,
    /// For output pads of auto-demand filters: names of the input pads
    /// whose upstream credit this output's demand replenishes.
    pub demand_pads: Vec<Arc<str>>,
}

impl PadSpec {
    fn new(name: impl Into<Arc<str>>, direction: PadDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            mode: PadMode::Pull,
            availability: PadAvailability::Always,
            demand_unit: DemandUnit::Buffers,
            accepted_caps: CapsSpec::any(),
            buffer: PullBufferConfig::default(),
            demand_pads: Vec::new(),
        }
    }

    /// Declare an input pad (pull mode, always available by default).
    pub fn input(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, PadDirection::Input)
    }

    /// Declare an output pad (pull mode, always available by default).
    pub fn output(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, PadDirection::Output)
    }

    /// Switch the pad to push mode.
    pub fn push(mut self) -> Self {
        self.mode = PadMode::Push;
        self
    }

    /// Make the pad on-request.
    pub fn on_request(mut self) -> Self {
        self.availability = PadAvailability::OnRequest;
        self
    }

    /// Count demand in the given unit.
    pub fn with_demand_unit(mut self, unit: DemandUnit) -> Self {
        self.demand_unit = unit;
        self
    }

    /// Constrain the caps this pad accepts.
    pub fn with_accepted_caps(mut self, spec: CapsSpec) -> Self {
        self.accepted_caps = spec;
        self
    }

    /// Configure the pull queue behind this input.
    pub fn with_buffer(mut self, config: PullBufferConfig) -> Self {
        self.buffer = config;
        self
    }

    /// Couple this output's demand to the given input pads (auto-demand).
    pub fn with_demand_pads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.demand_pads = names.into_iter().map(Into::into).collect();
        self
    }
}

/// What one end of a link tells the other about itself.
#[derive(Debug, Clone)]
pub struct PadInfo {
    /// The pad's reference.
    pub pad: PadRef,
    /// Its direction.
    pub direction: PadDirection,
    /// Its flow mode.
    pub mode: PadMode,
    /// The unit it counts demand in.
    pub demand_unit: DemandUnit,
    /// The caps it accepts.
    pub accepted_caps: CapsSpec,
}

// ============================================================================
// PadData
// ============================================================================

/// Runtime state of one live pad.
#[derive(Debug)]
pub struct PadData {
    /// The instance reference.
    pub pad: PadRef,
    /// Direction; immutable after creation.
    pub direction: PadDirection,
    /// Flow mode; immutable after creation.
    pub mode: PadMode,
    /// Unit this pad counts demand in.
    pub demand_unit: DemandUnit,
    /// The peer's demand unit, learned at link time.
    pub other_demand_unit: Option<DemandUnit>,
    /// Accepted caps constraint.
    pub accepted_caps: CapsSpec,
    /// Last negotiated caps, if any.
    pub caps: Option<Caps>,
    /// The linked peer, if any.
    pub peer: Option<Endpoint>,
    /// The pull queue, for self-driven pull inputs.
    pub buffer: Option<PullBuffer>,
    /// Credit counter. On an output pad: downstream demand not yet
    /// satisfied. On an auto-demand input: credit issued upstream and not
    /// yet consumed. On a self-driven pull input: the element's own pending
    /// consumption demand.
    pub demand: i64,
    /// Names of inputs replenished by this output (auto-demand wiring).
    pub demand_pads: Vec<Arc<str>>,
    /// Whether this input's credit is governed by downstream coupling.
    pub auto_demand: bool,
    /// Start-of-stream seen (input) or sent (output). Monotone.
    pub start_of_stream: bool,
    /// End-of-stream seen (input) or sent (output). Monotone.
    pub end_of_stream: bool,
    buffer_config: PullBufferConfig,
}

impl PadData {
    /// The preferred queue size for this pad, falling back to the unit
    /// default when unconfigured.
    pub fn preferred_size(&self) -> u64 {
        self.buffer_config
            .preferred_size
            .unwrap_or_else(|| self.demand_unit.default_preferred_size())
    }

    /// Whether this pad is an input.
    pub fn is_input(&self) -> bool {
        self.direction == PadDirection::Input
    }

    /// Whether this pad is an output.
    pub fn is_output(&self) -> bool {
        self.direction == PadDirection::Output
    }

    fn toilet_levels(&self) -> Toilet {
        self.buffer_config.toilet.unwrap_or_else(|| {
            let preferred = self.preferred_size();
            Toilet {
                warn: preferred * 2,
                fail: preferred * 4,
            }
        })
    }
}

// ============================================================================
// PadsState
// ============================================================================

/// All pads of one element, with the link state machine.
#[derive(Debug)]
pub struct PadsState {
    element: Arc<str>,
    specs: Vec<PadSpec>,
    pads: HashMap<PadRef, PadData>,
    generations: HashMap<Arc<str>, u32>,
    pending_added: Vec<PadRef>,
    linking_finished: bool,
}

impl PadsState {
    /// Validate the declarations and instantiate always-available pads.
    pub fn new(element: Arc<str>, specs: Vec<PadSpec>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.clone()) {
                return Err(Error::Init {
                    reason: format!("duplicate pad name '{}'", spec.name),
                });
            }
        }
        for spec in &specs {
            for linked in &spec.demand_pads {
                let target = specs
                    .iter()
                    .find(|s| s.name == *linked)
                    .ok_or_else(|| Error::Init {
                        reason: format!(
                            "pad '{}' demand-links unknown pad '{linked}'",
                            spec.name
                        ),
                    })?;
                if spec.direction != PadDirection::Output
                    || target.direction != PadDirection::Input
                {
                    return Err(Error::Init {
                        reason: format!(
                            "demand link '{}' -> '{linked}' must go output to input",
                            spec.name
                        ),
                    });
                }
            }
        }

        let mut state = Self {
            element,
            specs,
            pads: HashMap::new(),
            generations: HashMap::new(),
            pending_added: Vec::new(),
            linking_finished: false,
        };
        let always: Vec<PadRef> = state
            .specs
            .iter()
            .filter(|s| s.availability == PadAvailability::Always)
            .map(|s| PadRef::Static(s.name.clone()))
            .collect();
        for pad in always {
            let data = state.instantiate(&pad)?;
            state.pads.insert(pad, data);
        }
        Ok(state)
    }

    fn spec(&self, name: &str) -> Option<&PadSpec> {
        self.specs.iter().find(|s| &*s.name == name)
    }

    fn instantiate(&self, pad: &PadRef) -> Result<PadData> {
        let spec = self.spec(pad.name()).ok_or_else(|| Error::Init {
            reason: format!("no pad named '{}'", pad.name()),
        })?;
        let auto_demand = spec.direction == PadDirection::Input
            && self.specs.iter().any(|s| s.demand_pads.contains(&spec.name));
        Ok(PadData {
            pad: pad.clone(),
            direction: spec.direction,
            mode: spec.mode,
            demand_unit: spec.demand_unit,
            other_demand_unit: None,
            accepted_caps: spec.accepted_caps.clone(),
            caps: None,
            peer: None,
            buffer: None,
            demand: 0,
            demand_pads: spec.demand_pads.clone(),
            auto_demand,
            start_of_stream: false,
            end_of_stream: false,
            buffer_config: spec.buffer.clone(),
        })
    }

    /// Resolve a declared pad name to a usable reference.
    ///
    /// Static pads return their name; on-request pads get a fresh
    /// `(name, generation)` instance reference.
    pub fn get_pad_ref(&mut self, name: &str) -> Result<PadRef> {
        let spec = self
            .spec(name)
            .ok_or_else(|| Error::link(format!("unknown pad '{name}'")))?;
        let availability = spec.availability;
        let spec_name = spec.name.clone();
        match availability {
            PadAvailability::Always => Ok(PadRef::Static(spec_name)),
            PadAvailability::OnRequest => {
                let generation = self.generations.entry(spec_name.clone()).or_insert(0);
                let pad = PadRef::Dynamic(spec_name, *generation);
                *generation += 1;
                Ok(pad)
            }
        }
    }

    /// Describe a pad towards a link peer. Works for on-request refs whose
    /// instance does not exist yet.
    pub fn pad_info(&self, pad: &PadRef) -> Result<PadInfo> {
        if let Some(data) = self.pads.get(pad) {
            return Ok(PadInfo {
                pad: pad.clone(),
                direction: data.direction,
                mode: data.mode,
                demand_unit: data.demand_unit,
                accepted_caps: data.accepted_caps.clone(),
            });
        }
        let spec = self
            .spec(pad.name())
            .ok_or_else(|| Error::link(format!("unknown pad '{}'", pad.name())))?;
        Ok(PadInfo {
            pad: pad.clone(),
            direction: spec.direction,
            mode: spec.mode,
            demand_unit: spec.demand_unit,
            accepted_caps: spec.accepted_caps.clone(),
        })
    }

    /// Establish this element's half of a link.
    ///
    /// Creates the pad instance if it is an on-request ref, checks the mode
    /// compatibility table, direction opposition and caps intersection,
    /// records the peer, and wires up the pull queue or initial auto-demand
    /// credit. Returns this pad's info for the peer.
    pub fn handle_link(
        &mut self,
        direction: PadDirection,
        pad: &PadRef,
        other: Endpoint,
        other_info: &PadInfo,
    ) -> Result<PadInfo> {
        let created = pad.is_dynamic() && !self.pads.contains_key(pad);
        if created {
            let spec = self
                .spec(pad.name())
                .ok_or_else(|| Error::link(format!("unknown pad '{}'", pad.name())))?;
            if spec.availability != PadAvailability::OnRequest {
                return Err(Error::link(format!(
                    "pad '{}' is not declared on-request",
                    pad.name()
                )));
            }
            let data = self.instantiate(pad)?;
            self.pads.insert(pad.clone(), data);
            self.pending_added.push(pad.clone());
        }

        let result = self.commit_link(direction, pad, other, other_info);
        if result.is_err() && created {
            // A pad instance that never linked must not outlive the attempt.
            self.pads.remove(pad);
            self.pending_added.retain(|p| p != pad);
        }
        result
    }

    fn commit_link(
        &mut self,
        direction: PadDirection,
        pad: &PadRef,
        other: Endpoint,
        other_info: &PadInfo,
    ) -> Result<PadInfo> {
        let element = self.element.clone();
        let data = self
            .pads
            .get_mut(pad)
            .ok_or_else(|| Error::link(format!("unknown pad {pad}")))?;

        if data.direction != direction {
            return Err(Error::link(format!(
                "pad {pad} is not an {direction:?} pad"
            )));
        }
        if other_info.direction != direction.opposite() {
            return Err(Error::link(format!(
                "cannot link two {direction:?} pads ({pad} and {})",
                other_info.pad
            )));
        }
        if data.peer.is_some() {
            return Err(Error::link(format!("pad {pad} already linked")));
        }

        let (output_mode, input_mode) = match direction {
            PadDirection::Output => (data.mode, other_info.mode),
            PadDirection::Input => (other_info.mode, data.mode),
        };
        if output_mode == PadMode::Pull && input_mode == PadMode::Push {
            return Err(Error::link(format!(
                "pull output {} cannot feed push input {}",
                match direction {
                    PadDirection::Output => pad,
                    PadDirection::Input => &other_info.pad,
                },
                match direction {
                    PadDirection::Output => &other_info.pad,
                    PadDirection::Input => pad,
                },
            )));
        }

        if !data.accepted_caps.intersects(&other_info.accepted_caps) {
            return Err(Error::link(format!(
                "accepted caps of {pad} ({}) and {} ({}) do not intersect",
                data.accepted_caps, other_info.pad, other_info.accepted_caps
            )));
        }

        data.other_demand_unit = Some(other_info.demand_unit);

        match direction {
            PadDirection::Input if data.mode == PadMode::Pull => {
                if data.auto_demand {
                    // Credit is coupled to downstream demand; prime it.
                    if output_mode == PadMode::Pull {
                        let preferred = data.preferred_size();
                        DemandSender::new(other.element.clone(), other.pad.clone())
                            .send(preferred);
                        data.demand = preferred as i64;
                    }
                } else {
                    let mut config = data.buffer_config.clone();
                    if output_mode == PadMode::Push {
                        config.toilet = Some(data.toilet_levels());
                    }
                    data.buffer = Some(PullBuffer::new(
                        element,
                        pad.clone(),
                        DemandSender::new(other.element.clone(), other.pad.clone()),
                        data.demand_unit,
                        &config,
                    ));
                }
            }
            PadDirection::Output if data.mode == PadMode::Push && input_mode == PadMode::Pull => {
                // Tell the pull input there is no credit to wait for.
                let _ = other.element.send(Message::PushModeAnnouncement {
                    pad: other.pad.clone(),
                });
            }
            _ => {}
        }

        data.peer = Some(other);
        self.pad_info(pad)
    }

    /// Whether `linking_finished` has been signalled.
    pub fn is_linking_finished(&self) -> bool {
        self.linking_finished
    }

    /// Mark the current link batch as complete and drain the on-request
    /// pads awaiting their added notification.
    pub fn linking_finished(&mut self) -> Vec<PadRef> {
        self.linking_finished = true;
        std::mem::take(&mut self.pending_added)
    }

    /// Drain added notifications outside a link batch (late links).
    pub fn drain_pending_added(&mut self) -> Vec<PadRef> {
        std::mem::take(&mut self.pending_added)
    }

    /// Tear down a pad's link. Idempotent.
    ///
    /// Drops any buffered data. An on-request instance is destroyed and its
    /// ref returned so the runtime can emit the removed notification.
    pub fn handle_unlink(&mut self, pad: &PadRef) -> Option<PadRef> {
        let Some(data) = self.pads.get_mut(pad) else {
            return None;
        };
        data.peer = None;
        data.buffer = None;
        data.demand = 0;
        data.other_demand_unit = None;
        if pad.is_dynamic() {
            self.pads.remove(pad);
            Some(pad.clone())
        } else {
            None
        }
    }

    /// Arm the overflow detector on a pull input whose producer announced
    /// push mode. A no-op for push inputs and already-armed queues.
    pub fn enable_toilet_if_pull(&mut self, pad: &PadRef) -> Result<()> {
        let data = self
            .pads
            .get_mut(pad)
            .ok_or_else(|| Error::link(format!("unknown pad {pad}")))?;
        if data.mode == PadMode::Pull {
            let toilet = data.toilet_levels();
            if let Some(buffer) = data.buffer.as_mut() {
                buffer.enable_toilet(toilet);
            }
        }
        Ok(())
    }

    /// Look up a pad.
    pub fn get(&self, pad: &PadRef) -> Result<&PadData> {
        self.pads
            .get(pad)
            .ok_or_else(|| Error::link(format!("unknown pad {pad}")))
    }

    /// Look up a pad mutably.
    pub fn get_mut(&mut self, pad: &PadRef) -> Result<&mut PadData> {
        self.pads
            .get_mut(pad)
            .ok_or_else(|| Error::link(format!("unknown pad {pad}")))
    }

    /// All live pads.
    pub fn iter(&self) -> impl Iterator<Item = &PadData> {
        self.pads.values()
    }

    /// All live pads, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PadData> {
        self.pads.values_mut()
    }

    /// Refs of all live output pads.
    pub fn output_refs(&self) -> Vec<PadRef> {
        self.pads
            .values()
            .filter(|p| p.is_output())
            .map(|p| p.pad.clone())
            .collect()
    }

    /// Refs of the live inputs demand-linked to the given output.
    pub fn demand_linked_inputs(&self, output: &PadRef) -> Vec<PadRef> {
        let Some(data) = self.pads.get(output) else {
            return Vec::new();
        };
        let names = data.demand_pads.clone();
        self.pads
            .values()
            .filter(|p| p.is_input() && names.iter().any(|n| &**n == p.pad.name()))
            .map(|p| p.pad.clone())
            .collect()
    }
}
