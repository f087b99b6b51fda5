//! # cortexflow: reactive dataflow for real-time neural signal pipelines
//!
//! A single-process, synchronous, pull-driven graph engine that schedules
//! incremental recomputation across a chain of processing stages. Each
//! stage is a node with a three-phase lifecycle (initialize / update /
//! reset); attribute edits and upstream changes raise flags that the next
//! tick resolves lazily, so no central scheduler inspects the whole graph
//! per tick.
//!
//! ## Architecture
//!
//! - **Graph**: slot arena + adjacency, lifecycle state machine, message
//!   delivery to listeners
//! - **Pipeline**: chain bookkeeping (source → processors → outputs) and
//!   the external tick entry point
//! - **Stages**: built-in source/processor/output behaviors; user stages
//!   plug in through the `NodeBehavior` trait
//! - **Boundaries**: crossbeam channels feed acquisition blocks in and
//!   carry sink events out; the engine itself never blocks on them
//!
//! ## Example
//!
//! ```
//! use cortexflow::config::PipelineConfig;
//! use cortexflow::pipeline::PipelineBuilder;
//! use cortexflow::types::{SampleBlock, StreamInfo};
//!
//! # fn main() -> cortexflow::Result<()> {
//! let config = PipelineConfig::new(StreamInfo::eeg(8, 500.0));
//! let (mut pipeline, handles) = PipelineBuilder::new(config).build()?;
//! pipeline.initialize_all()?;
//!
//! // The acquisition side feeds blocks; an external timer drives ticks.
//! handles.feed_tx.send(SampleBlock::zeros(8, 50)).unwrap();
//! pipeline.update_all()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{GraphError, Result};
pub use pipeline::{
    AnyBehavior, AttrValue, BuiltinBehavior, Graph, Message, NodeBehavior, NodeContext, NodeId,
    NodeStatus, Pipeline, PipelineBuilder, Role,
};
pub use types::{ChannelInfo, ChannelKind, SampleBlock, StreamInfo, TIME_AXIS};
