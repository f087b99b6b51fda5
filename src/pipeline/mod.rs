//! Reactive dataflow graph for incremental signal processing.
//!
//! Data flows through a chain of roles: Source (acquisition) → Processor
//! (filtering, screening, envelopes) → Output (broadcast, recording).
//!
//! # Architecture
//!
//! ```text
//! [ReplaySource] ──► [ChannelScreen] ──► [BandFilter] ──► [EnvelopeFollower]
//!                                                    ├──► [BroadcastOutput]
//!                                                    └──► [SegmentRecorder]
//! ```
//!
//! # Design
//!
//! - **Lazy lifecycle resolution** — attribute writes and upstream
//!   messages only raise flags; the next update call resolves them, with
//!   reinitialize outranking reset outranking history invalidation.
//! - **Explicit registry** — nodes live in a slot arena with adjacency
//!   lists, validated acyclic, iterated deterministically.
//! - **Enum dispatch** — `BuiltinBehavior` for the built-in stages,
//!   `Box<dyn NodeBehavior>` for plugins, both behind `AnyBehavior`.
//! - **Pull-driven ticks** — an external caller drives one pass per tick
//!   over the chain in topological order; there is no internal clock.

pub mod attr;
pub mod executor;
pub mod graph;
pub mod id;
pub mod message;
pub mod node;
pub mod nodes;

pub use attr::{stream_attr, AttrSnapshot, AttrValue, BAD_CHANNELS, CHANNEL_LABELS, SAMPLE_RATE};
pub use executor::{Pipeline, PipelineBuilder, PipelineHandles, PipelineStageIds};
pub use graph::{Graph, NodeStatus};
pub use id::NodeId;
pub use message::Message;
pub use node::{AnyBehavior, BuiltinBehavior, NodeBehavior, NodeContext, Role};
