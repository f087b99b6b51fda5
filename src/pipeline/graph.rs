//! The node registry and lifecycle engine.
//!
//! Nodes live in a slot arena indexed by [`NodeId`]; edges are explicit
//! adjacency (one `upstream` id per slot, a listener id list per slot)
//! rather than references embedded in the nodes, so the graph can be
//! validated acyclic and iterated deterministically.
//!
//! The engine evaluates one transition per update request, in strict
//! priority order:
//!
//! 1. An upstream "changed" message arrived → diff the tracked upstream
//!    attributes against the snapshot captured at initialization; drift
//!    raises the reinitialize flag.
//! 2. Uninitialized, or reinitialize pending → run the initialize hook,
//!    capture a fresh snapshot, notify listeners (`changed` +
//!    `history_invalid`), clear every pending flag.
//! 3. Initialized with nothing pending → run the update hook.
//! 4. Otherwise → run the reset hook if requested (notifying listeners
//!    with the hook's own history verdict), then the history-invalidation
//!    hook if still flagged.
//!
//! Reinitialize outranks reset outranks history invalidation; there is no
//! point resetting state that a rebuild is about to recreate from scratch.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::{AttrSnapshot, AttrValue};
use crate::pipeline::id::NodeId;
use crate::pipeline::message::Message;
use crate::pipeline::node::{AnyBehavior, NodeContext, Role};
use crate::types::SampleBlock;
use std::time::Instant;

/// Per-node lifecycle flags.
///
/// Three independent kinds of outstanding work, plus the transient
/// upstream-changed latch set by message receipt, plus the hook-window
/// suppression bit.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NodeFlags {
    pub upstream_changed: bool,
    pub reinit_requested: bool,
    pub reset_requested: bool,
    pub input_history_invalid: bool,
    suppressed: bool,
}

impl NodeFlags {
    fn no_pending(&self) -> bool {
        !self.reinit_requested && !self.reset_requested && !self.input_history_invalid
    }

    fn clear_pending(&mut self) {
        self.reinit_requested = false;
        self.reset_requested = false;
        self.input_history_invalid = false;
        self.upstream_changed = false;
    }

    /// Single entry point for attribute-triggered resets. A no-op while a
    /// hook is executing (the suppression window).
    fn mark_reset_needed(&mut self) {
        if !self.suppressed {
            self.reset_requested = true;
        }
    }

    /// Record an upstream message. Assigns rather than ORs, matching the
    /// reference protocol: the latest message wins.
    fn receive(&mut self, message: Message) {
        self.upstream_changed = message.changed();
        self.input_history_invalid = message.history_invalid();
    }
}

/// Call-scoped suppression of self-triggered reset flags, held by the
/// engine for the duration of every hook invocation.
struct HookScope<'a> {
    flags: &'a mut NodeFlags,
}

impl<'a> HookScope<'a> {
    fn enter(flags: &'a mut NodeFlags) -> Self {
        flags.suppressed = true;
        Self { flags }
    }
}

impl Drop for HookScope<'_> {
    fn drop(&mut self) {
        self.flags.suppressed = false;
    }
}

/// Read-only snapshot of a node's lifecycle state, for the editing/UI
/// collaborator and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub initialized: bool,
    pub disabled: bool,
    pub upstream_changed: bool,
    pub reinit_requested: bool,
    pub reset_requested: bool,
    pub input_history_invalid: bool,
}

/// A slot holding a node's behavior and the engine-owned state around it.
struct NodeSlot {
    name: String,
    behavior: AnyBehavior,
    upstream: Option<NodeId>,
    listeners: Vec<NodeId>,
    output: Option<SampleBlock>,
    initialized: bool,
    flags: NodeFlags,
    snapshot: AttrSnapshot,
    /// Administratively disabled; honored for the Processor role.
    disabled: bool,
}

impl NodeSlot {
    fn new(behavior: AnyBehavior) -> Self {
        Self {
            name: behavior.name().to_string(),
            behavior,
            upstream: None,
            listeners: Vec::new(),
            output: None,
            initialized: false,
            flags: NodeFlags::default(),
            snapshot: AttrSnapshot::new(),
            disabled: false,
        }
    }
}

/// The node arena plus the lifecycle engine that drives it.
///
/// Slots are tombstoned on removal so ids stay stable. All external
/// attribute writes funnel through [`Graph::set_attr`]; hooks receive a
/// [`NodeContext`] and therefore cannot reach this mutation surface.
#[derive(Default)]
pub struct Graph {
    slots: Vec<Option<NodeSlot>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Structure ──

    /// Add a node. Returns its id; the node starts uninitialized with no
    /// upstream.
    pub fn add_node(&mut self, behavior: AnyBehavior) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        let slot = NodeSlot::new(behavior);
        tracing::info!(node = %slot.name, id = %id, "added node");
        self.slots.push(Some(slot));
        id
    }

    /// Remove a node. Its listeners lose their upstream (and are marked
    /// for reinitialization if they were initialized).
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let listeners = self.slot(id)?.listeners.clone();
        for listener in listeners {
            self.set_upstream(listener, None)?;
        }
        if let Some(up) = self.slot(id)?.upstream {
            if let Ok(up_slot) = self.slot_mut(up) {
                up_slot.listeners.retain(|&l| l != id);
            }
        }
        tracing::info!(node = %self.slot(id)?.name, "removed node");
        self.slots[id.index()] = None;
        Ok(())
    }

    /// Assign or clear a node's upstream.
    ///
    /// Registration is the only place listeners are wired: the node is
    /// removed from its old upstream's listener list and appended to the
    /// new one's. Gaining an upstream delivers an immediate synthetic
    /// message (`changed`, `history_invalid`) to the node, and marks it
    /// for reinitialization if it was already initialized — a changed
    /// upstream identity invalidates everything.
    pub fn set_upstream(&mut self, node: NodeId, upstream: Option<NodeId>) -> Result<()> {
        self.slot(node)?;
        if let Some(up) = upstream {
            self.slot(up)?;
            if up == node || self.would_create_cycle(node, up) {
                return Err(GraphError::CycleDetected { node, upstream: up });
            }
        }
        let current = self.slot(node)?.upstream;
        if current == upstream {
            return Ok(());
        }

        {
            let slot = self.slot_mut(node)?;
            slot.flags.reinit_requested = slot.initialized;
        }
        if let Some(old) = current {
            if let Ok(old_slot) = self.slot_mut(old) {
                old_slot.listeners.retain(|&l| l != node);
            }
        }
        self.slot_mut(node)?.upstream = upstream;
        if let Some(up) = upstream {
            self.slot_mut(up)?.listeners.push(node);
            self.slot_mut(node)?
                .flags
                .receive(Message::new(true, true));
        }
        Ok(())
    }

    fn would_create_cycle(&self, node: NodeId, upstream: NodeId) -> bool {
        let mut cursor = Some(upstream);
        while let Some(id) = cursor {
            if id == node {
                return true;
            }
            cursor = self
                .slots
                .get(id.index())
                .and_then(|s| s.as_ref())
                .and_then(|s| s.upstream);
        }
        false
    }

    // ── Accessors ──

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// Ids of all live nodes, in insertion order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn name(&self, id: NodeId) -> Result<&str> {
        Ok(&self.slot(id)?.name)
    }

    pub fn upstream(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.slot(id)?.upstream)
    }

    pub fn listeners(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.slot(id)?.listeners.clone())
    }

    pub fn status(&self, id: NodeId) -> Result<NodeStatus> {
        let slot = self.slot(id)?;
        Ok(NodeStatus {
            initialized: slot.initialized,
            disabled: slot.disabled,
            upstream_changed: slot.flags.upstream_changed,
            reinit_requested: slot.flags.reinit_requested,
            reset_requested: slot.flags.reset_requested,
            input_history_invalid: slot.flags.input_history_invalid,
        })
    }

    /// The node's current output. Read-only; contents are valid until the
    /// node's next update.
    pub fn output(&self, id: NodeId) -> Result<Option<&SampleBlock>> {
        Ok(self.slot(id)?.output.as_ref())
    }

    /// Read access to a node's behavior (for role-specific accessors).
    pub fn behavior(&self, id: NodeId) -> Result<&AnyBehavior> {
        Ok(&self.slot(id)?.behavior)
    }

    /// Mutable access to a node's behavior. Attribute writes should go
    /// through [`Graph::set_attr`] instead, or the reset protocol is
    /// bypassed.
    pub fn behavior_mut(&mut self, id: NodeId) -> Result<&mut AnyBehavior> {
        Ok(&mut self.slot_mut(id)?.behavior)
    }

    // ── Attribute writes ──

    /// Write an attribute on a node.
    ///
    /// The behavior validates the value; on success, a write to one of the
    /// node's declared reset-triggering attributes schedules a reset that
    /// the next update call resolves. Writes to untracked attributes never
    /// raise flags.
    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &AttrValue) -> Result<()> {
        let slot = self.slot_mut(id)?;
        slot.behavior.set_attr(key, value)?;
        if slot.behavior.reset_triggers().contains(&key) {
            slot.flags.mark_reset_needed();
            tracing::debug!(node = %slot.name, key, "reset-triggering attribute written");
        } else {
            tracing::debug!(node = %slot.name, key, "attribute written");
        }
        Ok(())
    }

    /// Administratively disable or enable a node. Disabled processors pass
    /// their upstream output through unchanged.
    pub fn set_disabled(&mut self, id: NodeId, disabled: bool) -> Result<()> {
        self.slot_mut(id)?.disabled = disabled;
        Ok(())
    }

    // ── Lifecycle entry points ──

    /// Advance the node by one step: resolve any pending lifecycle
    /// transition, else run its computation.
    pub fn update(&mut self, id: NodeId) -> Result<()> {
        let mut slot = self.take_slot(id)?;
        let outcome = self.update_taken(&mut slot);
        self.slots[id.index()] = Some(slot);
        let messages = outcome?;
        self.deliver(id, &messages);
        Ok(())
    }

    /// Resolve pending lifecycle transitions without producing data.
    /// Used for the initialization cascade down a chain.
    pub fn settle(&mut self, id: NodeId) -> Result<()> {
        let mut slot = self.take_slot(id)?;
        let outcome = self.drive_slot(&mut slot, false);
        self.slots[id.index()] = Some(slot);
        let messages = outcome?;
        self.deliver(id, &messages);
        Ok(())
    }

    /// Initialize the node now. Fails with a protocol fault when the node
    /// is already initialized and nothing calls for a rebuild.
    pub fn initialize(&mut self, id: NodeId) -> Result<()> {
        let mut slot = self.take_slot(id)?;
        let outcome = self.initialize_slot(&mut slot);
        self.slots[id.index()] = Some(slot);
        let message = outcome?;
        self.deliver(id, &[message]);
        Ok(())
    }

    /// Run the reset hook now. Fails with a protocol fault when no reset
    /// is pending.
    pub fn reset(&mut self, id: NodeId) -> Result<()> {
        let mut slot = self.take_slot(id)?;
        let outcome = self.reset_slot(&mut slot);
        self.slots[id.index()] = Some(slot);
        let message = outcome?;
        self.deliver(id, &[message]);
        Ok(())
    }

    /// Run the history-invalidation hook now. Fails with a protocol fault
    /// when input history is not flagged invalid.
    pub fn on_input_history_invalidation(&mut self, id: NodeId) -> Result<()> {
        let mut slot = self.take_slot(id)?;
        let outcome = self.history_slot(&mut slot);
        self.slots[id.index()] = Some(slot);
        let message = outcome?;
        self.deliver(id, &[message]);
        Ok(())
    }

    // ── Engine internals ──

    fn take_slot(&mut self, id: NodeId) -> Result<NodeSlot> {
        self.slots
            .get_mut(id.index())
            .and_then(|s| s.take())
            .ok_or(GraphError::UnknownNode(id))
    }

    fn slot(&self, id: NodeId) -> Result<&NodeSlot> {
        self.slots
            .get(id.index())
            .and_then(|s| s.as_ref())
            .ok_or(GraphError::UnknownNode(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut NodeSlot> {
        self.slots
            .get_mut(id.index())
            .and_then(|s| s.as_mut())
            .ok_or(GraphError::UnknownNode(id))
    }

    fn output_of(&self, id: NodeId) -> Option<&SampleBlock> {
        self.slots
            .get(id.index())
            .and_then(|s| s.as_ref())
            .and_then(|s| s.output.as_ref())
    }

    /// Walk the upstream chain starting at `start` for the nearest node
    /// publishing `name`.
    pub(crate) fn find_attr_from(&self, start: NodeId, name: &str) -> Option<AttrValue> {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let slot = self.slots.get(id.index()).and_then(|s| s.as_ref())?;
            if let Some(value) = slot.behavior.attr(name) {
                return Some(value);
            }
            cursor = slot.upstream;
        }
        None
    }

    fn deliver(&mut self, from: NodeId, messages: &[Message]) {
        if messages.is_empty() {
            return;
        }
        let listeners = match self.slots.get(from.index()).and_then(|s| s.as_ref()) {
            Some(slot) => slot.listeners.clone(),
            None => return,
        };
        for &message in messages {
            for &listener in &listeners {
                if let Some(slot) = self.slots.get_mut(listener.index()).and_then(|s| s.as_mut())
                {
                    slot.flags.receive(message);
                }
            }
        }
    }

    /// Role short-circuits, then the generic transition machinery.
    fn update_taken(&self, slot: &mut NodeSlot) -> Result<Vec<Message>> {
        match slot.behavior.role() {
            Role::Source => self.drive_slot(slot, true),
            Role::Processor => {
                let upstream = slot.upstream.ok_or_else(|| GraphError::MissingUpstream {
                    node: slot.name.clone(),
                })?;
                if slot.disabled {
                    slot.output = self.output_of(upstream).cloned();
                    return Ok(Vec::new());
                }
                match self.output_of(upstream) {
                    Some(block) if !block.is_empty() => self.drive_slot(slot, true),
                    _ => {
                        slot.output = None;
                        Ok(Vec::new())
                    }
                }
            }
            Role::Output => {
                let upstream = slot.upstream.ok_or_else(|| GraphError::MissingUpstream {
                    node: slot.name.clone(),
                })?;
                match self.output_of(upstream) {
                    Some(block) if !block.is_empty() => self.drive_slot(slot, true),
                    _ => Ok(Vec::new()),
                }
            }
        }
    }

    /// The transition rule of the module docs. `run_update` is false for
    /// the settle path, which resolves transitions without computing.
    fn drive_slot(&self, slot: &mut NodeSlot, run_update: bool) -> Result<Vec<Message>> {
        if run_update {
            // Cleared up front so a failing update leaves no stale output.
            slot.output = None;
        }

        if slot.flags.upstream_changed {
            slot.flags.reinit_requested = self.upstream_drift(slot)?;
            slot.flags.upstream_changed = false;
        }

        if slot.initialized && slot.flags.no_pending() {
            if run_update {
                self.run_update_hook(slot)?;
            }
            Ok(Vec::new())
        } else if !slot.initialized || slot.flags.reinit_requested {
            Ok(vec![self.initialize_slot(slot)?])
        } else {
            let mut messages = Vec::new();
            if slot.flags.reset_requested {
                messages.push(self.reset_slot(slot)?);
            }
            if slot.flags.input_history_invalid {
                messages.push(self.history_slot(slot)?);
            }
            Ok(messages)
        }
    }

    fn run_update_hook(&self, slot: &mut NodeSlot) -> Result<()> {
        let input = slot.upstream.and_then(|u| self.output_of(u));
        let mut ctx = NodeContext {
            graph: self,
            node_name: &slot.name,
            upstream: slot.upstream,
            input,
            output: &mut slot.output,
        };
        let _hook = HookScope::enter(&mut slot.flags);
        slot.behavior.update(&mut ctx)
    }

    fn initialize_slot(&self, slot: &mut NodeSlot) -> Result<Message> {
        if slot.initialized && !slot.flags.reinit_requested {
            return Err(GraphError::Protocol(format!(
                "{}: initialize called with no indication for it",
                slot.name
            )));
        }

        let snapshot = self.capture_snapshot(slot)?;
        let started = Instant::now();
        tracing::info!(node = %slot.name, "initializing");

        let result = {
            let input = slot.upstream.and_then(|u| self.output_of(u));
            let mut ctx = NodeContext {
                graph: self,
                node_name: &slot.name,
                upstream: slot.upstream,
                input,
                output: &mut slot.output,
            };
            let _hook = HookScope::enter(&mut slot.flags);
            slot.behavior.initialize(&mut ctx)
        };
        if let Err(e) = result {
            slot.initialized = false;
            return Err(e);
        }

        if slot.behavior.role() == Role::Source {
            let check = match slot.behavior.stream_info() {
                None => Err("initialize left no stream descriptor".to_string()),
                Some(info) => info.validate(),
            };
            if let Err(message) = check {
                slot.initialized = false;
                return Err(GraphError::InvalidStreamInfo {
                    node: slot.name.clone(),
                    message,
                });
            }
        }

        slot.initialized = true;
        slot.snapshot = snapshot;
        slot.flags.clear_pending();
        tracing::info!(
            node = %slot.name,
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "initialized"
        );
        Ok(Message::new(true, true))
    }

    fn reset_slot(&self, slot: &mut NodeSlot) -> Result<Message> {
        if !slot.flags.reset_requested {
            return Err(GraphError::Protocol(format!(
                "{}: reset called with no indication for it",
                slot.name
            )));
        }
        tracing::info!(node = %slot.name, "resetting after attribute change");

        let history_invalid = {
            let input = slot.upstream.and_then(|u| self.output_of(u));
            let mut ctx = NodeContext {
                graph: self,
                node_name: &slot.name,
                upstream: slot.upstream,
                input,
                output: &mut slot.output,
            };
            let _hook = HookScope::enter(&mut slot.flags);
            slot.behavior.reset(&mut ctx)?
        };
        slot.flags.reset_requested = false;
        Ok(Message::new(true, history_invalid))
    }

    fn history_slot(&self, slot: &mut NodeSlot) -> Result<Message> {
        if !slot.flags.input_history_invalid {
            return Err(GraphError::Protocol(format!(
                "{}: history flush called with no indication for it",
                slot.name
            )));
        }
        tracing::info!(node = %slot.name, "input history no longer valid");

        {
            let input = slot.upstream.and_then(|u| self.output_of(u));
            let mut ctx = NodeContext {
                graph: self,
                node_name: &slot.name,
                upstream: slot.upstream,
                input,
                output: &mut slot.output,
            };
            let _hook = HookScope::enter(&mut slot.flags);
            slot.behavior.on_input_history_invalidation(&mut ctx)?;
        }
        slot.flags.input_history_invalid = false;
        Ok(Message::new(true, true))
    }

    /// Capture the tracked upstream attributes, reduced to comparable form.
    fn capture_snapshot(&self, slot: &NodeSlot) -> Result<AttrSnapshot> {
        let mut snapshot = AttrSnapshot::new();
        for &name in slot.behavior.reinit_triggers() {
            let raw = slot
                .upstream
                .and_then(|up| self.find_attr_from(up, name))
                .ok_or_else(|| GraphError::MissingUpstreamAttribute {
                    node: slot.name.clone(),
                    attribute: name.to_string(),
                })?;
            snapshot.insert(name, slot.behavior.reduce_upstream_attr(name, raw));
        }
        Ok(snapshot)
    }

    /// Has anything this node tracks drifted upstream since the snapshot?
    fn upstream_drift(&self, slot: &NodeSlot) -> Result<bool> {
        for (name, saved) in &slot.snapshot {
            let raw = slot
                .upstream
                .and_then(|up| self.find_attr_from(up, name))
                .ok_or_else(|| GraphError::MissingUpstreamAttribute {
                    node: slot.name.clone(),
                    attribute: name.to_string(),
                })?;
            let current = slot.behavior.reduce_upstream_attr(name, raw);
            if saved != &current {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::attr::stream_attr;
    use crate::pipeline::node::{AnyBehavior, NodeBehavior};
    use crate::types::{SampleBlock, StreamInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const NO_ATTRS: &[&str] = &[];
    const SOURCE_RESET: &[&str] = &["gain"];
    const STAGE_RESET: &[&str] = &["threshold"];
    const TRACK_GAIN: &[&str] = &["gain"];

    /// Shared hook-call counters, readable after the behavior moved into
    /// the graph.
    #[derive(Clone, Default)]
    struct Counts {
        inits: Arc<AtomicUsize>,
        updates: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
        flushes: Arc<AtomicUsize>,
    }

    impl Counts {
        fn inits(&self) -> usize {
            self.inits.load(Ordering::Relaxed)
        }
        fn updates(&self) -> usize {
            self.updates.load(Ordering::Relaxed)
        }
        fn resets(&self) -> usize {
            self.resets.load(Ordering::Relaxed)
        }
        fn flushes(&self) -> usize {
            self.flushes.load(Ordering::Relaxed)
        }
    }

    struct ProbeSource {
        declared: StreamInfo,
        info: Option<StreamInfo>,
        gain: f64,
        produce_samples: usize,
        fail_initialize: bool,
        counts: Counts,
    }

    impl ProbeSource {
        fn new(channels: usize) -> (Self, Counts) {
            let counts = Counts::default();
            (
                Self {
                    declared: StreamInfo::eeg(channels, 100.0),
                    info: None,
                    gain: 1.0,
                    produce_samples: 4,
                    fail_initialize: false,
                    counts: counts.clone(),
                },
                counts,
            )
        }
    }

    impl NodeBehavior for ProbeSource {
        fn name(&self) -> &str {
            "ProbeSource"
        }

        fn role(&self) -> Role {
            Role::Source
        }

        fn reset_triggers(&self) -> &'static [&'static str] {
            SOURCE_RESET
        }

        fn attr(&self, name: &str) -> Option<AttrValue> {
            if name == "gain" {
                return Some(AttrValue::Float(self.gain));
            }
            self.info.as_ref().and_then(|info| stream_attr(info, name))
        }

        fn stream_info(&self) -> Option<&crate::types::StreamInfo> {
            self.info.as_ref()
        }

        fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()> {
            match key {
                "gain" => self.gain = value.as_float().unwrap(),
                "produce_samples" => self.produce_samples = value.as_int().unwrap() as usize,
                "fail_initialize" => self.fail_initialize = value.as_bool().unwrap(),
                _ => {
                    return Err(GraphError::UnknownAttribute {
                        node: self.name().to_string(),
                        attribute: key.to_string(),
                    })
                }
            }
            Ok(())
        }

        fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<()> {
            self.counts.inits.fetch_add(1, Ordering::Relaxed);
            if self.fail_initialize {
                return Err(GraphError::Computation {
                    node: self.name().to_string(),
                    message: "device refused to open".to_string(),
                });
            }
            self.info = Some(self.declared.clone());
            Ok(())
        }

        fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
            self.counts.updates.fetch_add(1, Ordering::Relaxed);
            *ctx.output = if self.produce_samples > 0 {
                Some(SampleBlock::zeros(
                    self.declared.channel_count(),
                    self.produce_samples,
                ))
            } else {
                None
            };
            Ok(())
        }

        fn reset(&mut self, _ctx: &mut NodeContext) -> Result<bool> {
            self.counts.resets.fetch_add(1, Ordering::Relaxed);
            self.info = Some(self.declared.clone());
            Ok(true)
        }

        fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
            self.counts.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct ProbeStage {
        role: Role,
        reinit: &'static [&'static str],
        threshold: f64,
        reset_verdict: bool,
        fail_update: bool,
        counts: Counts,
    }

    impl ProbeStage {
        fn new(role: Role, reinit: &'static [&'static str]) -> (Self, Counts) {
            let counts = Counts::default();
            (
                Self {
                    role,
                    reinit,
                    threshold: 0.0,
                    reset_verdict: false,
                    fail_update: false,
                    counts: counts.clone(),
                },
                counts,
            )
        }
    }

    impl NodeBehavior for ProbeStage {
        fn name(&self) -> &str {
            "ProbeStage"
        }

        fn role(&self) -> Role {
            self.role
        }

        fn reset_triggers(&self) -> &'static [&'static str] {
            STAGE_RESET
        }

        fn reinit_triggers(&self) -> &'static [&'static str] {
            self.reinit
        }

        fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()> {
            match key {
                "threshold" => self.threshold = value.as_float().unwrap(),
                "reset_verdict" => self.reset_verdict = value.as_bool().unwrap(),
                "fail_update" => self.fail_update = value.as_bool().unwrap(),
                _ => {
                    return Err(GraphError::UnknownAttribute {
                        node: self.name().to_string(),
                        attribute: key.to_string(),
                    })
                }
            }
            Ok(())
        }

        fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<()> {
            self.counts.inits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
            self.counts.updates.fetch_add(1, Ordering::Relaxed);
            if self.fail_update {
                return Err(GraphError::Computation {
                    node: self.name().to_string(),
                    message: "ill-conditioned solve".to_string(),
                });
            }
            if self.role == Role::Processor {
                *ctx.output = ctx.input.cloned();
            }
            Ok(())
        }

        fn reset(&mut self, _ctx: &mut NodeContext) -> Result<bool> {
            self.counts.resets.fetch_add(1, Ordering::Relaxed);
            Ok(self.reset_verdict)
        }

        fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
            self.counts.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn chain(
        graph: &mut Graph,
        reinit: &'static [&'static str],
    ) -> (NodeId, Counts, NodeId, Counts) {
        let (source, source_counts) = ProbeSource::new(2);
        let src = graph.add_node(AnyBehavior::Plugin(Box::new(source)));
        let (stage, stage_counts) = ProbeStage::new(Role::Processor, reinit);
        let node = graph.add_node(AnyBehavior::Plugin(Box::new(stage)));
        graph.set_upstream(node, Some(src)).unwrap();
        (src, source_counts, node, stage_counts)
    }

    fn tick(graph: &mut Graph, ids: &[NodeId]) {
        for &id in ids {
            graph.update(id).unwrap();
        }
    }

    #[test]
    fn test_first_update_initializes_then_updates() {
        let mut graph = Graph::new();
        let (src, src_counts, node, node_counts) = chain(&mut graph, NO_ATTRS);

        // Tick 1: source initializes; the processor sees no data yet.
        tick(&mut graph, &[src, node]);
        assert_eq!(src_counts.inits(), 1);
        assert_eq!(src_counts.updates(), 0);
        assert_eq!(node_counts.inits(), 0);

        // Tick 2: source produces; the processor initializes on its first
        // data-bearing update, without running its update hook.
        tick(&mut graph, &[src, node]);
        assert_eq!(src_counts.updates(), 1);
        assert_eq!(node_counts.inits(), 1);
        assert_eq!(node_counts.updates(), 0);

        // Tick 3: the processor updates.
        tick(&mut graph, &[src, node]);
        assert_eq!(node_counts.updates(), 1);
        assert!(graph.output(node).unwrap().is_some());
    }

    #[test]
    fn test_reset_hooks_require_pending_flags() {
        let mut graph = Graph::new();
        let (_src, _sc, node, _nc) = chain(&mut graph, NO_ATTRS);

        assert!(matches!(
            graph.reset(node),
            Err(GraphError::Protocol(_))
        ));
        assert!(matches!(
            graph.on_input_history_invalidation(node),
            Err(GraphError::Protocol(_))
        ));
    }

    #[test]
    fn test_initialize_requires_an_indication() {
        let mut graph = Graph::new();
        let (src, _sc, _node, _nc) = chain(&mut graph, NO_ATTRS);
        graph.settle(src).unwrap();
        assert!(matches!(
            graph.initialize(src),
            Err(GraphError::Protocol(_))
        ));
    }

    #[test]
    fn test_reset_trigger_write_schedules_reset() {
        let mut graph = Graph::new();
        let (src, _sc, node, node_counts) = chain(&mut graph, NO_ATTRS);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();

        graph
            .set_attr(node, "threshold", &AttrValue::Float(2.5))
            .unwrap();
        let status = graph.status(node).unwrap();
        assert!(status.reset_requested);
        assert!(!status.reinit_requested);

        // Next data-bearing update resolves the reset, not the update hook.
        tick(&mut graph, &[src, node]);
        assert_eq!(node_counts.resets(), 1);
        assert_eq!(node_counts.updates(), 0);

        // Flag exclusivity: the handled flag cleared, nothing else raised.
        let status = graph.status(node).unwrap();
        assert!(!status.reset_requested);
        assert!(!status.reinit_requested);
        assert!(!status.input_history_invalid);
    }

    #[test]
    fn test_untracked_attr_write_raises_nothing() {
        let mut graph = Graph::new();
        let (_src, _sc, node, _nc) = chain(&mut graph, NO_ATTRS);
        graph
            .set_attr(node, "reset_verdict", &AttrValue::Bool(true))
            .unwrap();
        let status = graph.status(node).unwrap();
        assert!(!status.reset_requested);
        assert!(!status.reinit_requested);
    }

    #[test]
    fn test_fan_out_delivery_and_independent_decisions() {
        let mut graph = Graph::new();
        let (source, _src_counts) = ProbeSource::new(2);
        let src = graph.add_node(AnyBehavior::Plugin(Box::new(source)));
        let (tracking, tracking_counts) = ProbeStage::new(Role::Processor, TRACK_GAIN);
        let a = graph.add_node(AnyBehavior::Plugin(Box::new(tracking)));
        let (passive, passive_counts) = ProbeStage::new(Role::Processor, NO_ATTRS);
        let b = graph.add_node(AnyBehavior::Plugin(Box::new(passive)));
        graph.set_upstream(a, Some(src)).unwrap();
        graph.set_upstream(b, Some(src)).unwrap();
        for id in [src, a, b] {
            graph.settle(id).unwrap();
        }
        assert_eq!(graph.listeners(src).unwrap(), vec![a, b]);

        // Raise a reset on the source; its resolution notifies both
        // listeners in the same tick.
        graph.set_attr(src, "gain", &AttrValue::Float(2.0)).unwrap();
        graph.update(src).unwrap();
        assert!(graph.status(a).unwrap().upstream_changed);
        assert!(graph.status(b).unwrap().upstream_changed);

        // Each listener decides for itself on its next data-bearing tick:
        // the gain-tracking one reinitializes, the passive one only
        // flushes history (the source reset invalidated it).
        tick(&mut graph, &[src, a, b]);
        assert_eq!(tracking_counts.inits(), 2);
        assert_eq!(tracking_counts.updates(), 0);
        assert_eq!(passive_counts.inits(), 1);
        assert_eq!(passive_counts.flushes(), 1);
    }

    #[test]
    fn test_upstream_drift_reinitializes_exactly_once() {
        let mut graph = Graph::new();
        let (src, _sc, node, node_counts) = chain(&mut graph, TRACK_GAIN);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();
        tick(&mut graph, &[src, node]);
        let updates_before = node_counts.updates();

        graph.set_attr(src, "gain", &AttrValue::Float(3.0)).unwrap();
        // The source resolves its reset this tick and emits no data, so
        // the downstream node only latches the message.
        tick(&mut graph, &[src, node]);
        assert_eq!(node_counts.inits(), 1);

        // The drift is detected on the next data-bearing update: exactly
        // one initialize, zero update-hook calls that tick.
        tick(&mut graph, &[src, node]);
        assert_eq!(node_counts.inits(), 2);
        assert_eq!(node_counts.updates(), updates_before);

        // And the tick after that is a plain update again.
        tick(&mut graph, &[src, node]);
        assert_eq!(node_counts.inits(), 2);
        assert_eq!(node_counts.updates(), updates_before + 1);
    }

    #[test]
    fn test_reinitialize_outranks_reset() {
        let mut graph = Graph::new();
        let (src, _sc, node, node_counts) = chain(&mut graph, TRACK_GAIN);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();
        tick(&mut graph, &[src, node]);

        // Both a local reset trigger and an upstream drift between ticks.
        graph
            .set_attr(node, "threshold", &AttrValue::Float(1.0))
            .unwrap();
        graph.set_attr(src, "gain", &AttrValue::Float(5.0)).unwrap();
        tick(&mut graph, &[src, node]);
        tick(&mut graph, &[src, node]);

        // Exactly the rebuild ran; the now-pointless reset never did.
        assert_eq!(node_counts.inits(), 2);
        assert_eq!(node_counts.resets(), 0);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = Graph::new();
        let (a_stage, _) = ProbeStage::new(Role::Processor, NO_ATTRS);
        let a = graph.add_node(AnyBehavior::Plugin(Box::new(a_stage)));
        let (b_stage, _) = ProbeStage::new(Role::Processor, NO_ATTRS);
        let b = graph.add_node(AnyBehavior::Plugin(Box::new(b_stage)));

        graph.set_upstream(b, Some(a)).unwrap();
        assert!(matches!(
            graph.set_upstream(a, Some(b)),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            graph.set_upstream(a, Some(a)),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_new_upstream_sends_synthetic_message() {
        let mut graph = Graph::new();
        let (src, _sc, node, _nc) = chain(&mut graph, NO_ATTRS);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();

        let (replacement, _counts) = ProbeSource::new(2);
        let new_src = graph.add_node(AnyBehavior::Plugin(Box::new(replacement)));
        graph.set_upstream(node, Some(new_src)).unwrap();

        let status = graph.status(node).unwrap();
        assert!(status.reinit_requested);
        assert!(status.upstream_changed);
        assert!(status.input_history_invalid);
        assert_eq!(graph.listeners(src).unwrap(), Vec::<NodeId>::new());
        assert_eq!(graph.listeners(new_src).unwrap(), vec![node]);
    }

    #[test]
    fn test_initialize_failure_leaves_node_uninitialized() {
        let mut graph = Graph::new();
        let (source, counts) = ProbeSource::new(2);
        let src = graph.add_node(AnyBehavior::Plugin(Box::new(source)));
        graph
            .set_attr(src, "fail_initialize", &AttrValue::Bool(true))
            .unwrap();

        assert!(graph.settle(src).is_err());
        assert!(!graph.status(src).unwrap().initialized);
        assert_eq!(counts.inits(), 1);

        // The graph does not auto-retry, but a corrected node recovers.
        graph
            .set_attr(src, "fail_initialize", &AttrValue::Bool(false))
            .unwrap();
        graph.settle(src).unwrap();
        assert!(graph.status(src).unwrap().initialized);
    }

    #[test]
    fn test_empty_input_is_idempotent() {
        let mut graph = Graph::new();
        let (src, _sc, node, node_counts) = chain(&mut graph, NO_ATTRS);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();
        graph
            .set_attr(src, "produce_samples", &AttrValue::Int(0))
            .unwrap();

        for _ in 0..5 {
            tick(&mut graph, &[src, node]);
            assert!(graph.output(node).unwrap().is_none());
        }
        assert_eq!(node_counts.updates(), 0);
    }

    #[test]
    fn test_disabled_processor_passes_through() {
        let mut graph = Graph::new();
        let (src, _sc, node, node_counts) = chain(&mut graph, NO_ATTRS);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();
        graph.set_disabled(node, true).unwrap();
        graph
            .set_attr(node, "threshold", &AttrValue::Float(9.0))
            .unwrap();

        tick(&mut graph, &[src, node]);
        // Pass-through, and the pending reset stays unresolved.
        assert_eq!(graph.output(node).unwrap(), graph.output(src).unwrap());
        assert_eq!(node_counts.resets(), 0);
        assert!(graph.status(node).unwrap().reset_requested);

        graph.set_disabled(node, false).unwrap();
        tick(&mut graph, &[src, node]);
        assert_eq!(node_counts.resets(), 1);
    }

    #[test]
    fn test_computation_fault_keeps_node_initialized() {
        let mut graph = Graph::new();
        let (src, _sc, node, _nc) = chain(&mut graph, NO_ATTRS);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();
        graph
            .set_attr(node, "fail_update", &AttrValue::Bool(true))
            .unwrap();

        graph.update(src).unwrap();
        assert!(matches!(
            graph.update(node),
            Err(GraphError::Computation { .. })
        ));
        let status = graph.status(node).unwrap();
        assert!(status.initialized);
        assert!(graph.output(node).unwrap().is_none());
    }

    #[test]
    fn test_detached_node_stops_hearing_messages() {
        let mut graph = Graph::new();
        let (src, _sc, node, _nc) = chain(&mut graph, NO_ATTRS);
        graph.settle(src).unwrap();
        graph.settle(node).unwrap();

        graph.set_upstream(node, None).unwrap();
        // Detaching an initialized node schedules a rebuild...
        assert!(graph.status(node).unwrap().reinit_requested);

        // ...but source events no longer reach it.
        graph.set_attr(src, "gain", &AttrValue::Float(7.0)).unwrap();
        graph.update(src).unwrap();
        assert!(!graph.status(node).unwrap().upstream_changed);
    }

    #[test]
    fn test_removed_node_is_gone() {
        let mut graph = Graph::new();
        let (src, _sc, node, _nc) = chain(&mut graph, NO_ATTRS);
        graph.remove_node(src).unwrap();
        assert!(!graph.contains(src));
        assert!(matches!(
            graph.update(src),
            Err(GraphError::UnknownNode(_))
        ));
        // The listener survives, detached and marked for rebuild.
        assert_eq!(graph.upstream(node).unwrap(), None);
    }
}
