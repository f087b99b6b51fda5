//! Pipeline orchestration — chain bookkeeping and the external tick.
//!
//! [`Pipeline`] owns the graph and the role bookkeeping around it: one
//! source, an ordered processor list, and outputs. Structural edits
//! re-wire upstream references; outputs added without an explicit parent
//! are "floating" and follow the chain tail whenever the topology
//! changes.
//!
//! The engine has no internal clock. An external caller invokes
//! [`Pipeline::update_all`] once per tick; nodes are visited in
//! topological (source → processors → outputs) order, so every node
//! observes the current tick's upstream output.

use crate::config::PipelineConfig;
use crate::error::{GraphError, Result};
use crate::pipeline::graph::Graph;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{AnyBehavior, BuiltinBehavior, Role};
use crate::pipeline::nodes::{
    BandFilter, BroadcastOutput, ChannelScreen, EnvelopeFollower, ReplaySource, SegmentRecorder,
    SinkEvent,
};
use crate::types::SampleBlock;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Instant;

/// An ordered processing chain over a [`Graph`].
#[derive(Default)]
pub struct Pipeline {
    graph: Graph,
    source: Option<NodeId>,
    processors: Vec<NodeId>,
    outputs: Vec<NodeId>,
    /// Parent requested at add time; `None` marks a floating output that
    /// follows the chain tail.
    output_parents: Vec<Option<NodeId>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying graph, for status queries and attribute writes.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Add a node to the graph without wiring it into the chain yet.
    pub fn add_node(&mut self, behavior: AnyBehavior) -> NodeId {
        self.graph.add_node(behavior)
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn processors(&self) -> &[NodeId] {
        &self.processors
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Every chain node in topological order.
    pub fn all_nodes(&self) -> Vec<NodeId> {
        let mut nodes = Vec::with_capacity(1 + self.processors.len() + self.outputs.len());
        nodes.extend(self.source);
        nodes.extend_from_slice(&self.processors);
        nodes.extend_from_slice(&self.outputs);
        nodes
    }

    /// Install or replace the source. Rewires the first processor and
    /// re-points floating outputs. A replaced source stays in the graph,
    /// detached from the chain, until removed explicitly.
    pub fn set_source(&mut self, id: NodeId) -> Result<()> {
        self.check_role(id, Role::Source, "source")?;
        self.source = Some(id);
        if let Some(&first) = self.processors.first() {
            self.graph.set_upstream(first, Some(id))?;
        }
        self.reconnect_floating_outputs()
    }

    /// Append a processor to the chain tail.
    pub fn add_processor(&mut self, id: NodeId) -> Result<()> {
        self.check_role(id, Role::Processor, "processor")?;
        if self.processors.contains(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        let tail = self.chain_tail();
        self.graph.set_upstream(id, tail)?;
        self.processors.push(id);
        self.reconnect_floating_outputs()
    }

    /// Attach an output. With `parent` unset the output floats: it stays
    /// connected to whatever node is the chain tail as the chain evolves.
    pub fn add_output(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<()> {
        self.check_role(id, Role::Output, "output")?;
        if let Some(p) = parent {
            let role = self.graph.behavior(p)?.role();
            if role == Role::Output {
                return Err(GraphError::RoleMismatch {
                    node: self.graph.name(p)?.to_string(),
                    expected: "source or processor",
                    actual: role.as_str(),
                });
            }
        }
        let target = parent.or_else(|| self.chain_tail());
        self.graph.set_upstream(id, target)?;
        self.outputs.push(id);
        self.output_parents.push(parent);
        Ok(())
    }

    fn chain_tail(&self) -> Option<NodeId> {
        self.processors.last().copied().or(self.source)
    }

    fn reconnect_floating_outputs(&mut self) -> Result<()> {
        let tail = self.chain_tail();
        for (&output, &parent) in self.outputs.iter().zip(&self.output_parents) {
            if let Some(target) = parent.or(tail) {
                self.graph.set_upstream(output, Some(target))?;
            }
        }
        Ok(())
    }

    fn check_role(&self, id: NodeId, expected: Role, expected_name: &'static str) -> Result<()> {
        let actual = self.graph.behavior(id)?.role();
        if actual != expected {
            return Err(GraphError::RoleMismatch {
                node: self.graph.name(id)?.to_string(),
                expected: expected_name,
                actual: actual.as_str(),
            });
        }
        Ok(())
    }

    /// Cascade initialization down the chain: every node resolves its
    /// pending lifecycle transitions in topological order, so each
    /// initialization sees a fully initialized upstream.
    pub fn initialize_all(&mut self) -> Result<()> {
        let started = Instant::now();
        tracing::info!("initializing pipeline");
        for id in self.all_nodes() {
            self.graph.settle(id)?;
        }
        tracing::info!(
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "pipeline initialized"
        );
        Ok(())
    }

    /// One external tick: update every chain node front to back.
    pub fn update_all(&mut self) -> Result<()> {
        tracing::debug!("tick");
        for id in self.all_nodes() {
            self.graph.update(id)?;
        }
        Ok(())
    }

    /// Sampling rate of the source stream.
    pub fn sample_rate(&self) -> Result<f64> {
        let source = self.source.ok_or_else(|| {
            GraphError::Protocol("no source has been set in the pipeline".into())
        })?;
        let behavior = self.graph.behavior(source)?;
        behavior
            .stream_info()
            .map(|info| info.sample_rate_hz)
            .ok_or_else(|| GraphError::InvalidStreamInfo {
                node: behavior.name().to_string(),
                message: "source has not published a stream descriptor yet".into(),
            })
    }
}

/// Node ids of the default chain, so callers can address specific stages.
#[derive(Debug, Clone, Copy)]
pub struct PipelineStageIds {
    pub source: NodeId,
    pub channel_screen: Option<NodeId>,
    pub band_filter: Option<NodeId>,
    pub envelope: Option<NodeId>,
    pub broadcast: Option<NodeId>,
    pub recorder: Option<NodeId>,
}

/// Channel endpoints connecting the pipeline to its collaborators.
pub struct PipelineHandles {
    pub stages: PipelineStageIds,
    /// Feed acquisition blocks in here, one or more per tick.
    pub feed_tx: Sender<SampleBlock>,
    /// Sink events come out here when a broadcast output is configured.
    pub sink_rx: Option<Receiver<SinkEvent>>,
}

/// Builder assembling the default chain from a [`PipelineConfig`].
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Build the configured chain:
    ///
    /// ```text
    /// ReplaySource → [ChannelScreen] → [BandFilter] → [EnvelopeFollower]
    ///                                              ├──► [BroadcastOutput]
    ///                                              └──► [SegmentRecorder]
    /// ```
    pub fn build(self) -> Result<(Pipeline, PipelineHandles)> {
        let mut pipeline = Pipeline::new();

        let (source_node, feed_tx) =
            ReplaySource::channel(self.config.stream.clone(), self.config.feed_capacity);
        let source = pipeline.add_node(AnyBehavior::Builtin(BuiltinBehavior::ReplaySource(
            source_node,
        )));
        pipeline.set_source(source)?;

        let channel_screen = match &self.config.channel_screen {
            Some(cfg) => {
                let id = pipeline.add_node(AnyBehavior::Builtin(BuiltinBehavior::ChannelScreen(
                    ChannelScreen::new(cfg.collect_seconds),
                )));
                pipeline.add_processor(id)?;
                Some(id)
            }
            None => None,
        };

        let band_filter = match &self.config.band_filter {
            Some(cfg) => {
                let id = pipeline.add_node(AnyBehavior::Builtin(BuiltinBehavior::BandFilter(
                    BandFilter::new(cfg.lower_cutoff, cfg.upper_cutoff),
                )));
                pipeline.add_processor(id)?;
                Some(id)
            }
            None => None,
        };

        let envelope = match &self.config.envelope {
            Some(cfg) => {
                let id = pipeline.add_node(AnyBehavior::Builtin(
                    BuiltinBehavior::EnvelopeFollower(EnvelopeFollower::new(cfg.factor)),
                ));
                pipeline.add_processor(id)?;
                Some(id)
            }
            None => None,
        };

        let (broadcast, sink_rx) = if self.config.broadcast {
            let (tx, rx) = bounded(self.config.sink_capacity);
            let id = pipeline.add_node(AnyBehavior::Builtin(BuiltinBehavior::BroadcastOutput(
                BroadcastOutput::new(tx),
            )));
            pipeline.add_output(id, None)?;
            (Some(id), Some(rx))
        } else {
            (None, None)
        };

        let recorder = if self.config.recorder {
            let id = pipeline.add_node(AnyBehavior::Builtin(BuiltinBehavior::SegmentRecorder(
                SegmentRecorder::new(),
            )));
            pipeline.add_output(id, None)?;
            Some(id)
        } else {
            None
        };

        let handles = PipelineHandles {
            stages: PipelineStageIds {
                source,
                channel_screen,
                band_filter,
                envelope,
                broadcast,
                recorder,
            },
            feed_tx,
            sink_rx,
        };
        Ok((pipeline, handles))
    }
}
