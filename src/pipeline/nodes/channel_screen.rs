//! ChannelScreen — running channel statistics and outlier screening.
//!
//! Passes data through unchanged while accumulating per-channel mean and
//! mean-of-squares over a configurable collection window. Once enough
//! samples arrived, channels whose standard deviation is a z-score
//! outlier are flagged. Flagged channels are reported, not dropped —
//! excluding them is a decision for the stages (or the operator)
//! downstream.

use crate::error::{GraphError, Result};
use crate::pipeline::attr::{AttrValue, BAD_CHANNELS, CHANNEL_LABELS};
use crate::pipeline::node::{NodeBehavior, NodeContext, Role};

const RESET_TRIGGERS: &[&str] = &["collect_seconds"];
const REINIT_TRIGGERS: &[&str] = &[CHANNEL_LABELS, BAD_CHANNELS];

const Z_THRESHOLD: f64 = 3.0;

/// Statistics-collecting passthrough processor.
pub struct ChannelScreen {
    collect_seconds: f64,
    samples_needed: usize,
    samples_collected: usize,
    enough_collected: bool,
    means: Vec<f64>,
    mean_squares: Vec<f64>,
    flagged: Vec<usize>,
}

impl ChannelScreen {
    pub fn new(collect_seconds: f64) -> Self {
        Self {
            collect_seconds,
            samples_needed: 0,
            samples_collected: 0,
            enough_collected: false,
            means: Vec::new(),
            mean_squares: Vec::new(),
            flagged: Vec::new(),
        }
    }

    pub fn collect_seconds(&self) -> f64 {
        self.collect_seconds
    }

    /// Indices of channels flagged as outliers, once the window filled.
    pub fn flagged_channels(&self) -> &[usize] {
        &self.flagged
    }

    pub fn window_filled(&self) -> bool {
        self.enough_collected
    }

    fn clear_statistics(&mut self) {
        self.samples_collected = 0;
        self.enough_collected = false;
        for m in &mut self.means {
            *m = 0.0;
        }
        for m in &mut self.mean_squares {
            *m = 0.0;
        }
        self.flagged.clear();
    }

    /// Merge a new block into the running statistics.
    ///
    /// Recursive mean update keeps the accumulators bounded regardless of
    /// window length.
    fn accumulate(&mut self, input: &crate::types::SampleBlock) {
        let n = self.samples_collected as f64;
        let m = input.sample_count() as f64;
        for ch in 0..input.channel_count() {
            let row = input.row(ch);
            let sum: f64 = row.iter().sum();
            let sum_sq: f64 = row.iter().map(|v| v * v).sum();
            self.means[ch] = (self.means[ch] * n + sum) / (n + m);
            self.mean_squares[ch] = (self.mean_squares[ch] * n + sum_sq) / (n + m);
        }
        self.samples_collected += input.sample_count();
    }

    fn screen(&mut self) {
        let n = self.samples_collected as f64;
        if n < 2.0 {
            return;
        }
        let stds: Vec<f64> = self
            .means
            .iter()
            .zip(&self.mean_squares)
            .map(|(mean, mean_sq)| (n / (n - 1.0) * (mean_sq - mean * mean)).max(0.0).sqrt())
            .collect();
        let count = stds.len() as f64;
        let center = stds.iter().sum::<f64>() / count;
        let spread =
            (stds.iter().map(|s| (s - center).powi(2)).sum::<f64>() / count).sqrt();
        if spread == 0.0 {
            return;
        }
        self.flagged = stds
            .iter()
            .enumerate()
            .filter(|(_, s)| ((*s - center) / spread).abs() > Z_THRESHOLD)
            .map(|(i, _)| i)
            .collect();
        if !self.flagged.is_empty() {
            tracing::warn!(channels = ?self.flagged, "channels screened as outliers");
        }
    }
}

impl NodeBehavior for ChannelScreen {
    fn name(&self) -> &str {
        "ChannelScreen"
    }

    fn role(&self) -> Role {
        Role::Processor
    }

    fn reset_triggers(&self) -> &'static [&'static str] {
        RESET_TRIGGERS
    }

    fn reinit_triggers(&self) -> &'static [&'static str] {
        REINIT_TRIGGERS
    }

    fn set_attr(&mut self, key: &str, value: &AttrValue) -> Result<()> {
        match key {
            "collect_seconds" => {
                let v = value.as_float().ok_or_else(|| GraphError::InvalidAttribute {
                    attribute: key.to_string(),
                    message: "expected a number".to_string(),
                })?;
                if !v.is_finite() || v <= 0.0 {
                    return Err(GraphError::InvalidAttribute {
                        attribute: key.to_string(),
                        message: format!("collection window must be positive, got {}", v),
                    });
                }
                self.collect_seconds = v;
            }
            _ => {
                return Err(GraphError::UnknownAttribute {
                    node: self.name().to_string(),
                    attribute: key.to_string(),
                })
            }
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let channel_count = ctx.upstream_channel_count()?;
        let sample_rate = ctx.upstream_sample_rate()?;
        self.means = vec![0.0; channel_count];
        self.mean_squares = vec![0.0; channel_count];
        self.samples_needed = (self.collect_seconds * sample_rate).ceil() as usize;
        self.clear_statistics();
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext) -> Result<()> {
        let input = ctx.input.ok_or_else(|| GraphError::Protocol(format!(
            "{}: update hook invoked without input",
            self.name()
        )))?;
        if input.channel_count() != self.means.len() {
            return Err(GraphError::ShapeMismatch {
                expected: self.means.len(),
                actual: input.channel_count(),
            });
        }

        if !self.enough_collected {
            self.accumulate(input);
            if self.samples_collected >= self.samples_needed {
                self.enough_collected = true;
                self.screen();
            }
        }

        *ctx.output = Some(input.clone());
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut NodeContext) -> Result<bool> {
        self.clear_statistics();
        // Statistics restart from nothing; the window boundary moved.
        Ok(true)
    }

    fn on_input_history_invalidation(&mut self, _ctx: &mut NodeContext) -> Result<()> {
        self.clear_statistics();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::Graph;
    use crate::pipeline::node::{AnyBehavior, BuiltinBehavior};
    use crate::pipeline::nodes::ReplaySource;
    use crate::types::{SampleBlock, StreamInfo};

    fn screen_chain(channels: usize) -> (Graph, crossbeam_channel::Sender<SampleBlock>, crate::pipeline::id::NodeId) {
        let mut graph = Graph::new();
        let (source, tx) = ReplaySource::channel(StreamInfo::eeg(channels, 10.0), 8);
        let src = graph.add_node(AnyBehavior::Builtin(BuiltinBehavior::ReplaySource(source)));
        let screen = graph.add_node(AnyBehavior::Builtin(BuiltinBehavior::ChannelScreen(
            ChannelScreen::new(1.0),
        )));
        graph.set_upstream(screen, Some(src)).unwrap();
        graph.settle(src).unwrap();
        graph.settle(screen).unwrap();
        (graph, tx, screen)
    }

    #[test]
    fn test_collect_seconds_domain() {
        let mut screen = ChannelScreen::new(60.0);
        assert!(screen
            .set_attr("collect_seconds", &AttrValue::Float(0.0))
            .is_err());
        assert!(screen
            .set_attr("collect_seconds", &AttrValue::Float(-3.0))
            .is_err());
        assert!(screen
            .set_attr("collect_seconds", &AttrValue::Int(30))
            .is_ok());
        assert_eq!(screen.collect_seconds(), 30.0);
    }

    #[test]
    fn test_passthrough_is_identity() {
        let (mut graph, tx, screen) = screen_chain(2);
        let block = SampleBlock::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        tx.send(block.clone()).unwrap();

        let src = graph.upstream(screen).unwrap().unwrap();
        graph.update(src).unwrap();
        graph.update(screen).unwrap();
        assert_eq!(graph.output(screen).unwrap().unwrap(), &block);
    }

    #[test]
    fn test_outlier_channel_flagged_after_window() {
        let (mut graph, tx, screen) = screen_chain(32);
        let src = graph.upstream(screen).unwrap().unwrap();

        // 31 quiet channels, one wild one. 10 Hz * 1 s window = 10 samples.
        for tick in 0..5 {
            let rows: Vec<Vec<f64>> = (0..32)
                .map(|ch| {
                    (0..2)
                        .map(|t| {
                            let sign = if (tick * 2 + t) % 2 == 0 { 1.0 } else { -1.0 };
                            if ch == 3 {
                                100.0 * sign
                            } else {
                                sign
                            }
                        })
                        .collect()
                })
                .collect();
            tx.send(SampleBlock::from_rows(&rows).unwrap()).unwrap();
            graph.update(src).unwrap();
            graph.update(screen).unwrap();
        }

        let behavior = graph.behavior(screen).unwrap();
        if let AnyBehavior::Builtin(BuiltinBehavior::ChannelScreen(node)) = behavior {
            assert!(node.window_filled());
            assert_eq!(node.flagged_channels(), &[3]);
        } else {
            panic!("expected ChannelScreen behavior");
        }
    }
}
