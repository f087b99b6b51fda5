//! SegmentRecorder — in-memory recording split at continuity breaks.
//!
//! Appends every incoming block to the current segment. A history
//! invalidation from upstream means new data cannot be treated as a
//! continuation of what was recorded, so the current segment is closed
//! and a fresh one started. Persisting recordings to disk belongs to the
//! excluded I/O layer; this node only owns the buffers.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::AttrValue;
use crate::pipeline::node::{NodeBehavior, NodeContext, Role};
use crate::types::SampleBlock;

/// Terminal recording stage.
pub struct SegmentRecorder {
    current: SampleBlock,
    segments: Vec<SampleBlock>,
    frames: u64,
}

impl SegmentRecorder {
    pub fn new() -> Self {
        Self {
            current: SampleBlock::zeros(0, 0),
            segments: Vec::new(),
            frames: 0,
        }
    }

    /// Total samples recorded since the last initialize.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Completed segments plus the in-progress one, if non-empty.
    pub fn segment_count(&self) -> usize {
        self.segments.len() + usize::from(!self.current.is_empty())
    }

    /// Close the current segment and hand over everything recorded.
    pub fn take_recording(&mut self) -> Vec<SampleBlock> {
        self.close_segment();
        self.frames = 0;
        std::mem::take(&mut self.segments)
    }

    fn close_segment(&mut self) {
        if !self.current.is_empty() {
            let finished = std::mem::replace(&mut self.current, SampleBlock::zeros(0, 0));
            self.segments.push(finished);
        }
    }
}

impl Default for SegmentRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBehavior for SegmentRecorder {
    fn name(&self) -> &str {
        "SegmentRecorder"
    }

    fn role(&self) -> Role {
        Role::Output
    }

    fn set_attr(&mut self, key: &str, _value: &AttrValue) -> Result<()> {
        Err(GraphError::UnknownAttribute {
            node: self.name().to_string(),
            attribute: key.to_string(),
        })
    }

    fn initialize(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        self.current = SampleBlock::zeros(0, 0);
        self.segments.clear();
        self.frames = 0;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let input = ctx.input.ok_or_else(|| GraphError::Protocol(format!(
            "{}: update hook invoked without input",
            self.name()
        )))?;
        self.current.append_samples(input)?;
        self.frames += input.sample_count() as u64;
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut NodeContext) -> Result<bool> {
        self.close_segment();
        Ok(false)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        self.close_segment();
        Ok(())
    }
}
