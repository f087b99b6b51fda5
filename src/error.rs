//! Error handling for the cortexflow engine.
//!
//! One crate-level error enum covers the whole fault taxonomy: protocol
//! violations (callers bypassing the flag protocol), validation faults
//! (descriptors or attribute values outside their domain), and computation
//! faults surfaced by node hooks. Transient empty input is *not* an error —
//! nodes treat it as a no-op tick.

use crate::pipeline::id::NodeId;
use thiserror::Error;

/// Main error type for cortexflow operations.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A lifecycle entry point was called against the flag protocol,
    /// e.g. `reset` without a pending reset flag.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Assigning this upstream would close a loop in the graph.
    #[error("cycle detected: making {upstream:?} the upstream of {node:?} would close a loop")]
    CycleDetected { node: NodeId, upstream: NodeId },

    /// A node instance was added to a pipeline collection it is already in.
    #[error("duplicate node: {0:?} is already part of the pipeline")]
    DuplicateNode(NodeId),

    /// The id does not refer to a live node in the graph.
    #[error("unknown node: {0:?}")]
    UnknownNode(NodeId),

    /// A node was given a role slot it does not fit.
    #[error("role mismatch: {node} is a {actual} node, expected {expected}")]
    RoleMismatch {
        node: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A processor or output has no upstream to pull from.
    #[error("{node} has no upstream")]
    MissingUpstream { node: String },

    /// Walked the whole upstream chain without finding the attribute.
    #[error("no predecessor of {node} publishes attribute `{attribute}`")]
    MissingUpstreamAttribute { node: String, attribute: String },

    /// An attribute value outside its declared domain.
    #[error("invalid value for `{attribute}`: {message}")]
    InvalidAttribute { attribute: String, message: String },

    /// An attribute write for a key the node does not expose.
    #[error("{node} has no attribute `{attribute}`")]
    UnknownAttribute { node: String, attribute: String },

    /// A source finished initializing with a missing, empty, or
    /// inconsistent stream descriptor.
    #[error("invalid stream descriptor for {node}: {message}")]
    InvalidStreamInfo { node: String, message: String },

    /// Two blocks with incompatible channel layouts met.
    #[error("shape mismatch: expected {expected} channels, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// A node's computation failed. Propagated unchanged to the tick caller.
    #[error("computation failed in {node}: {message}")]
    Computation { node: String, message: String },
}

/// Result type alias for cortexflow operations.
pub type Result<T> = std::result::Result<T, GraphError>;
