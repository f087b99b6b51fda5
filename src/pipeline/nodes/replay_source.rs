//! ReplaySource — source node fed by the acquisition collaborator.
//!
//! The acquisition layer (device reader, file replayer, network stream —
//! all outside this crate) holds the [`Sender`] half of a channel and
//! pushes sample blocks at its own pace. Each tick the source drains
//! everything queued since the last tick into one output block; an empty
//! queue is a normal no-data tick, not an error.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::{stream_attr, AttrValue};
use crate::pipeline::node::{NodeBehavior, NodeContext, Role};
use crate::types::{SampleBlock, StreamInfo};
use crossbeam_channel::{bounded, Receiver, Sender};

/// Source node replaying externally fed sample blocks.
pub struct ReplaySource {
    /// Descriptor given at construction; republished on every initialize.
    declared: StreamInfo,
    /// Descriptor as published to descendants. Absent until initialized.
    info: Option<StreamInfo>,
    rx: Receiver<SampleBlock>,
}

impl ReplaySource {
    /// Create the source and the feeding endpoint for the acquisition
    /// layer. `capacity` bounds how many blocks may queue between ticks.
    pub fn channel(declared: StreamInfo, capacity: usize) -> (Self, Sender<SampleBlock>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                declared,
                info: None,
                rx,
            },
            tx,
        )
    }

    /// The descriptor this source was constructed with.
    pub fn declared_info(&self) -> &StreamInfo {
        &self.declared
    }
}

impl NodeBehavior for ReplaySource {
    fn name(&self) -> &str {
        "ReplaySource"
    }

    fn role(&self) -> Role {
        Role::Source
    }

    fn attr(&self, name: &str) -> Option<AttrValue> {
        self.info.as_ref().and_then(|info| stream_attr(info, name))
    }

    fn stream_info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    fn set_attr(&mut self, key: &str, _value: &AttrValue) -> Result<()> {
        Err(GraphError::UnknownAttribute {
            node: self.name().to_string(),
            attribute: key.to_string(),
        })
    }

    fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        // Blocks queued before (re)initialization belong to the past.
        while self.rx.try_recv().is_ok() {}
        self.info = Some(self.declared.clone());
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let mut merged: Option<SampleBlock> = None;
        while let Ok(block) = self.rx.try_recv() {
            match merged.as_mut() {
                Some(acc) => acc.append_samples(&block)?,
                None => merged = Some(block),
            }
        }
        *ctx.output = merged.filter(|b| !b.is_empty());
        Ok(())
    }

    fn reset(&mut self, ctx: &mut NodeContext) -> Result<bool> {
        // A source reset is a full rebuild; nothing lighter to do.
        self.initialize(ctx)?;
        Ok(true)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        Ok(())
    }
}
