//! Test stage implementations with observable hook counters.
//!
//! Counters are shared through `Arc` handles cloned off before the stage
//! moves into the graph, so tests can keep watching after ownership
//! transfers.

use cortexflow::pipeline::attr::CHANNEL_LABELS;
use cortexflow::{AttrValue, GraphError, NodeBehavior, NodeContext, Role, SampleBlock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared hook-call counters.
#[derive(Clone, Default)]
pub struct HookCounts {
    inits: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
}

impl HookCounts {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::Relaxed)
    }
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }
}

const MODE_TRIGGER: &[&str] = &["mode"];
const NO_TRACKING: &[&str] = &[];
const TRACK_CHANNELS: &[&str] = &[CHANNEL_LABELS];

/// Identity processor with a reset-triggering `mode` attribute.
pub struct CountingProcessor {
    mode: String,
    reset_verdict: bool,
    track_channels: bool,
    counts: HookCounts,
}

impl CountingProcessor {
    /// `reset_verdict` is what the reset hook reports: whether output
    /// history is no longer valid after the reset.
    pub fn new(reset_verdict: bool) -> (Self, HookCounts) {
        let counts = HookCounts::default();
        (
            Self {
                mode: "plain".to_string(),
                reset_verdict,
                track_channels: false,
                counts: counts.clone(),
            },
            counts,
        )
    }

    /// Track the upstream channel set for reinitialization drift.
    pub fn tracking_channels(reset_verdict: bool) -> (Self, HookCounts) {
        let (mut stage, counts) = Self::new(reset_verdict);
        stage.track_channels = true;
        (stage, counts)
    }
}

impl NodeBehavior for CountingProcessor {
    fn name(&self) -> &str {
        "CountingProcessor"
    }

    fn role(&self) -> Role {
        Role::Processor
    }

    fn reset_triggers(&self) -> &'static [&'static str] {
        MODE_TRIGGER
    }

    fn reinit_triggers(&self) -> &'static [&'static str] {
        if self.track_channels {
            TRACK_CHANNELS
        } else {
            NO_TRACKING
        }
    }

    fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<(), GraphError> {
        match key {
            "mode" => {
                self.mode = value
                    .as_str()
                    .ok_or_else(|| GraphError::InvalidAttribute {
                        attribute: key.to_string(),
                        message: "expected a string".to_string(),
                    })?
                    .to_string();
                Ok(())
            }
            _ => Err(GraphError::UnknownAttribute {
                node: self.name().to_string(),
                attribute: key.to_string(),
            }),
        }
    }

    fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<(), GraphError> {
        self.counts.inits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<(), GraphError> {
        self.counts.updates.fetch_add(1, Ordering::Relaxed);
        *ctx.output = ctx.input.cloned();
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut NodeContext) -> Result<bool, GraphError> {
        self.counts.resets.fetch_add(1, Ordering::Relaxed);
        Ok(self.reset_verdict)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<(), GraphError> {
        self.counts.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Terminal stage capturing the last block it saw.
pub struct CountingOutput {
    last_block: Arc<Mutex<Option<SampleBlock>>>,
    counts: HookCounts,
}

impl CountingOutput {
    pub fn new() -> (Self, HookCounts, Arc<Mutex<Option<SampleBlock>>>) {
        let counts = HookCounts::default();
        let last_block = Arc::new(Mutex::new(None));
        (
            Self {
                last_block: last_block.clone(),
                counts: counts.clone(),
            },
            counts,
            last_block,
        )
    }
}

impl NodeBehavior for CountingOutput {
    fn name(&self) -> &str {
        "CountingOutput"
    }

    fn role(&self) -> Role {
        Role::Output
    }

    fn set_attr(&mut self, key: &str, _value: &AttrValue) -> Result<(), GraphError> {
        Err(GraphError::UnknownAttribute {
            node: self.name().to_string(),
            attribute: key.to_string(),
        })
    }

    fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<(), GraphError> {
        self.counts.inits.fetch_add(1, Ordering::Relaxed);
        *self.last_block.lock().unwrap() = None;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<(), GraphError> {
        self.counts.updates.fetch_add(1, Ordering::Relaxed);
        *self.last_block.lock().unwrap() = ctx.input.cloned();
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut NodeContext) -> Result<bool, GraphError> {
        self.counts.resets.fetch_add(1, Ordering::Relaxed);
        Ok(false)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<(), GraphError> {
        self.counts.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
