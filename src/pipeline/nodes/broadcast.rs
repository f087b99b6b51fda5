//! BroadcastOutput — forwards blocks to the rendering/UI collaborator.
//!
//! Terminal stage pushing each tick's block over a crossbeam channel. A
//! full channel drops the block and counts it instead of blocking the
//! tick; the consumer side decides how to catch up.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::AttrValue;
use crate::pipeline::node::{NodeBehavior, NodeContext, Role};
use crate::types::SampleBlock;
use crossbeam_channel::{Sender, TrySendError};

/// Events published to the consuming side.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// One tick's worth of output data.
    Block(SampleBlock),
    /// Upstream continuity broke; rendered history should not be extended.
    HistoryBreak,
}

/// Terminal broadcast stage.
pub struct BroadcastOutput {
    tx: Sender<SinkEvent>,
    dropped: u64,
}

impl BroadcastOutput {
    pub fn new(tx: Sender<SinkEvent>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Events dropped because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn publish(&mut self, event: SinkEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                if self.dropped == 1 {
                    tracing::warn!(node = self.name(), "sink consumer is not keeping up");
                }
            }
        }
    }
}

impl NodeBehavior for BroadcastOutput {
    fn name(&self) -> &str {
        "BroadcastOutput"
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
        self.dropped = 0;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let input = ctx.input.ok_or_else(|| GraphError::Protocol(format!(
            "{}: update hook invoked without input",
            self.name()
        )))?;
        self.publish(SinkEvent::Block(input.clone()));
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut NodeContext) -> Result<bool> {
        Ok(false)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        self.publish(SinkEvent::HistoryBreak);
        Ok(())
    }
}
