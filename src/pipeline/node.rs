//! Node abstraction for the pipeline graph.
//!
//! Two-layer design:
//! - **`NodeBehavior` trait** — the fixed hook set every stage implements,
//!   also the extension point for user-defined stages.
//! - **`BuiltinBehavior` enum** — all built-in stages behind enum dispatch.
//!
//! `AnyBehavior` wraps either variant so the graph engine can drive both
//! uniformly. The engine never inspects concrete node identity: lifecycle
//! decisions are made purely through this interface plus the per-slot
//! flags it keeps itself.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::AttrValue;
use crate::pipeline::graph::Graph;
use crate::pipeline::id::NodeId;
use crate::pipeline::nodes::{
    BandFilter, BroadcastOutput, ChannelScreen, EnvelopeFollower, ReplaySource, SegmentRecorder,
};
use crate::types::{SampleBlock, StreamInfo};

/// Which role a node plays in the chain. Decides the empty-input and
/// disabled short-circuits applied before the generic lifecycle machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces data; has no upstream.
    Source,
    /// Transforms upstream data; passes through unchanged when disabled.
    Processor,
    /// Terminal consumer; never passes data through.
    Output,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Processor => "processor",
            Role::Output => "output",
        }
    }
}

/// Context passed to node lifecycle hooks.
///
/// Gives a hook read access to the current upstream output and to
/// attributes published anywhere up the chain, and write access to the
/// node's own output slot. Hooks cannot reach the graph's mutation
/// surface, so internal state writes can never re-raise lifecycle flags.
pub struct NodeContext<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) node_name: &'a str,
    pub(crate) upstream: Option<NodeId>,
    /// Output of the upstream node this tick, if it produced one.
    pub input: Option<&'a SampleBlock>,
    /// The node's output slot — write results here.
    pub output: &'a mut Option<SampleBlock>,
}

impl NodeContext<'_> {
    /// Walk the upstream chain for the nearest node publishing `name`.
    pub fn upstream_attr(&self, name: &str) -> Result<AttrValue> {
        self.upstream
            .and_then(|up| self.graph.find_attr_from(up, name))
            .ok_or_else(|| GraphError::MissingUpstreamAttribute {
                node: self.node_name.to_string(),
                attribute: name.to_string(),
            })
    }

    /// Sampling rate published upstream.
    pub fn upstream_sample_rate(&self) -> Result<f64> {
        let value = self.upstream_attr(crate::pipeline::attr::SAMPLE_RATE)?;
        value.as_float().ok_or_else(|| GraphError::InvalidAttribute {
            attribute: crate::pipeline::attr::SAMPLE_RATE.into(),
            message: "expected a number".into(),
        })
    }

    /// Number of channels published upstream.
    pub fn upstream_channel_count(&self) -> Result<usize> {
        let value = self.upstream_attr(crate::pipeline::attr::CHANNEL_LABELS)?;
        let labels = value
            .as_str_list()
            .ok_or_else(|| GraphError::InvalidAttribute {
                attribute: crate::pipeline::attr::CHANNEL_LABELS.into(),
                message: "expected a label list".into(),
            })?;
        Ok(labels.len())
    }
}

/// The fixed hook set every pipeline stage implements.
///
/// The lifecycle engine decides *when* each hook runs (see the graph
/// module); behaviors only say *what* happens. Two declared attribute sets
/// make the change-propagation contract explicit and compile-checkable:
/// [`reset_triggers`](NodeBehavior::reset_triggers) for local writes that
/// schedule a reset, and
/// [`reinit_triggers`](NodeBehavior::reinit_triggers) for upstream
/// attributes whose drift since initialization schedules a full rebuild.
pub trait NodeBehavior: Send {
    /// Human-readable name of this node.
    fn name(&self) -> &str;

    /// Role in the chain.
    fn role(&self) -> Role;

    /// Local attributes whose mutation schedules a reset.
    fn reset_triggers(&self) -> &'static [&'static str] {
        &[]
    }

    /// Upstream attributes whose drift schedules reinitialization.
    fn reinit_triggers(&self) -> &'static [&'static str] {
        &[]
    }

    /// Published attribute lookup, answered on behalf of descendants.
    fn attr(&self, _name: &str) -> Option<AttrValue> {
        None
    }

    /// Reduce a volatile upstream attribute to the stable form this node
    /// wants snapshotted and compared. Defaults to the value itself.
    fn reduce_upstream_attr(&self, _name: &str, value: AttrValue) -> AttrValue {
        value
    }

    /// The stream descriptor, for sources. The engine validates it after
    /// every source initialization.
    fn stream_info(&self) -> Option<&StreamInfo> {
        None
    }

    /// Apply an attribute write from the editing layer. Implementations
    /// validate the value and return a validation fault for values outside
    /// the attribute's domain, or for unknown keys.
    fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()>;

    /// Prepare everything for the first update. Called again only for a
    /// full rebuild; must remove all traces of the past.
    fn initialize(&mut self, ctx: &mut NodeContext) -> Result<()>;

    /// Produce a new output from the current upstream output.
    fn update(&mut self, ctx: &mut NodeContext) -> Result<()>;

    /// React to a local attribute change. Returns whether output history
    /// is no longer valid: `true` tells descendants to forget everything
    /// seen so far, `false` means the change was strictly local.
    fn reset(&mut self, ctx: &mut NodeContext) -> Result<bool>;

    /// Upstream continuity broke without a structural change; drop
    /// whatever internal state depends on previous inputs.
    fn on_input_history_invalidation(&mut self, ctx: &mut NodeContext) -> Result<()>;
}

/// Enum dispatch for built-in stages.
pub enum BuiltinBehavior {
    ReplaySource(ReplaySource),
    BandFilter(BandFilter),
    EnvelopeFollower(EnvelopeFollower),
    ChannelScreen(ChannelScreen),
    SegmentRecorder(SegmentRecorder),
    BroadcastOutput(BroadcastOutput),
}

impl BuiltinBehavior {
    pub fn name(&self) -> &str {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.name(),
            BuiltinBehavior::BandFilter(n) => n.name(),
            BuiltinBehavior::EnvelopeFollower(n) => n.name(),
            BuiltinBehavior::ChannelScreen(n) => n.name(),
            BuiltinBehavior::SegmentRecorder(n) => n.name(),
            BuiltinBehavior::BroadcastOutput(n) => n.name(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.role(),
            BuiltinBehavior::BandFilter(n) => n.role(),
            BuiltinBehavior::EnvelopeFollower(n) => n.role(),
            BuiltinBehavior::ChannelScreen(n) => n.role(),
            BuiltinBehavior::SegmentRecorder(n) => n.role(),
            BuiltinBehavior::BroadcastOutput(n) => n.role(),
        }
    }

    pub fn reset_triggers(&self) -> &'static [&'static str] {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.reset_triggers(),
            BuiltinBehavior::BandFilter(n) => n.reset_triggers(),
            BuiltinBehavior::EnvelopeFollower(n) => n.reset_triggers(),
            BuiltinBehavior::ChannelScreen(n) => n.reset_triggers(),
            BuiltinBehavior::SegmentRecorder(n) => n.reset_triggers(),
            BuiltinBehavior::BroadcastOutput(n) => n.reset_triggers(),
        }
    }

    pub fn reinit_triggers(&self) -> &'static [&'static str] {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.reinit_triggers(),
            BuiltinBehavior::BandFilter(n) => n.reinit_triggers(),
            BuiltinBehavior::EnvelopeFollower(n) => n.reinit_triggers(),
            BuiltinBehavior::ChannelScreen(n) => n.reinit_triggers(),
            BuiltinBehavior::SegmentRecorder(n) => n.reinit_triggers(),
            BuiltinBehavior::BroadcastOutput(n) => n.reinit_triggers(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<AttrValue> {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.attr(name),
            BuiltinBehavior::BandFilter(n) => n.attr(name),
            BuiltinBehavior::EnvelopeFollower(n) => n.attr(name),
            BuiltinBehavior::ChannelScreen(n) => n.attr(name),
            BuiltinBehavior::SegmentRecorder(n) => n.attr(name),
            BuiltinBehavior::BroadcastOutput(n) => n.attr(name),
        }
    }

    pub fn reduce_upstream_attr(&self, name: &str, value: AttrValue) -> AttrValue {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.reduce_upstream_attr(name, value),
            BuiltinBehavior::BandFilter(n) => n.reduce_upstream_attr(name, value),
            BuiltinBehavior::EnvelopeFollower(n) => n.reduce_upstream_attr(name, value),
            BuiltinBehavior::ChannelScreen(n) => n.reduce_upstream_attr(name, value),
            BuiltinBehavior::SegmentRecorder(n) => n.reduce_upstream_attr(name, value),
            BuiltinBehavior::BroadcastOutput(n) => n.reduce_upstream_attr(name, value),
        }
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.stream_info(),
            BuiltinBehavior::BandFilter(n) => n.stream_info(),
            BuiltinBehavior::EnvelopeFollower(n) => n.stream_info(),
            BuiltinBehavior::ChannelScreen(n) => n.stream_info(),
            BuiltinBehavior::SegmentRecorder(n) => n.stream_info(),
            BuiltinBehavior::BroadcastOutput(n) => n.stream_info(),
        }
    }

    pub fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()> {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.set_attr(key, value),
            BuiltinBehavior::BandFilter(n) => n.set_attr(key, value),
            BuiltinBehavior::EnvelopeFollower(n) => n.set_attr(key, value),
            BuiltinBehavior::ChannelScreen(n) => n.set_attr(key, value),
            BuiltinBehavior::SegmentRecorder(n) => n.set_attr(key, value),
            BuiltinBehavior::BroadcastOutput(n) => n.set_attr(key, value),
        }
    }

    pub fn initialize(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.initialize(ctx),
            BuiltinBehavior::BandFilter(n) => n.initialize(ctx),
            BuiltinBehavior::EnvelopeFollower(n) => n.initialize(ctx),
            BuiltinBehavior::ChannelScreen(n) => n.initialize(ctx),
            BuiltinBehavior::SegmentRecorder(n) => n.initialize(ctx),
            BuiltinBehavior::BroadcastOutput(n) => n.initialize(ctx),
        }
    }

    pub fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.update(ctx),
            BuiltinBehavior::BandFilter(n) => n.update(ctx),
            BuiltinBehavior::EnvelopeFollower(n) => n.update(ctx),
            BuiltinBehavior::ChannelScreen(n) => n.update(ctx),
            BuiltinBehavior::SegmentRecorder(n) => n.update(ctx),
            BuiltinBehavior::BroadcastOutput(n) => n.update(ctx),
        }
    }

    pub fn reset(&mut self, ctx: &mut NodeContext) -> Result<bool> {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.reset(ctx),
            BuiltinBehavior::BandFilter(n) => n.reset(ctx),
            BuiltinBehavior::EnvelopeFollower(n) => n.reset(ctx),
            BuiltinBehavior::ChannelScreen(n) => n.reset(ctx),
            BuiltinBehavior::SegmentRecorder(n) => n.reset(ctx),
            BuiltinBehavior::BroadcastOutput(n) => n.reset(ctx),
        }
    }

    pub fn on_input_history_invalidation(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            BuiltinBehavior::ReplaySource(n) => n.on_input_history_invalidation(ctx),
            BuiltinBehavior::BandFilter(n) => n.on_input_history_invalidation(ctx),
            BuiltinBehavior::EnvelopeFollower(n) => n.on_input_history_invalidation(ctx),
            BuiltinBehavior::ChannelScreen(n) => n.on_input_history_invalidation(ctx),
            BuiltinBehavior::SegmentRecorder(n) => n.on_input_history_invalidation(ctx),
            BuiltinBehavior::BroadcastOutput(n) => n.on_input_history_invalidation(ctx),
        }
    }
}

/// Wrapper holding either a built-in stage (enum dispatch) or a
/// user-defined one (trait object).
pub enum AnyBehavior {
    Builtin(BuiltinBehavior),
    Plugin(Box<dyn NodeBehavior>),
}

impl AnyBehavior {
    pub fn name(&self) -> &str {
        match self {
            AnyBehavior::Builtin(n) => n.name(),
            AnyBehavior::Plugin(n) => n.name(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            AnyBehavior::Builtin(n) => n.role(),
            AnyBehavior::Plugin(n) => n.role(),
        }
    }

    pub fn reset_triggers(&self) -> &'static [&'static str] {
        match self {
            AnyBehavior::Builtin(n) => n.reset_triggers(),
            AnyBehavior::Plugin(n) => n.reset_triggers(),
        }
    }

    pub fn reinit_triggers(&self) -> &'static [&'static str] {
        match self {
            AnyBehavior::Builtin(n) => n.reinit_triggers(),
            AnyBehavior::Plugin(n) => n.reinit_triggers(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<AttrValue> {
        match self {
            AnyBehavior::Builtin(n) => n.attr(name),
            AnyBehavior::Plugin(n) => n.attr(name),
        }
    }

    pub fn reduce_upstream_attr(&self, name: &str, value: AttrValue) -> AttrValue {
        match self {
            AnyBehavior::Builtin(n) => n.reduce_upstream_attr(name, value),
            AnyBehavior::Plugin(n) => n.reduce_upstream_attr(name, value),
        }
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        match self {
            AnyBehavior::Builtin(n) => n.stream_info(),
            AnyBehavior::Plugin(n) => n.stream_info(),
        }
    }

    pub fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()> {
        match self {
            AnyBehavior::Builtin(n) => n.set_attr(key, value),
            AnyBehavior::Plugin(n) => n.set_attr(key, value),
        }
    }

    pub fn initialize(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            AnyBehavior::Builtin(n) => n.initialize(ctx),
            AnyBehavior::Plugin(n) => n.initialize(ctx),
        }
    }

    pub fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            AnyBehavior::Builtin(n) => n.update(ctx),
            AnyBehavior::Plugin(n) => n.update(ctx),
        }
    }

    pub fn reset(&mut self, ctx: &mut NodeContext) -> Result<bool> {
        match self {
            AnyBehavior::Builtin(n) => n.reset(ctx),
            AnyBehavior::Plugin(n) => n.reset(ctx),
        }
    }

    pub fn on_input_history_invalidation(&mut self, ctx: &mut NodeContext) -> Result<()> {
        match self {
            AnyBehavior::Builtin(n) => n.on_input_history_invalidation(ctx),
            AnyBehavior::Plugin(n) => n.on_input_history_invalidation(ctx),
        }
    }
}
