//! Error types for the DAG engine

use thiserror::Error;

use crate::node::NodeId;

/// Result type alias using DagError
pub type Result<T> = std::result::Result<T, DagError>;

/// Errors that can occur while resolving or executing a node graph
#[derive(Debug, Error)]
pub enum DagError {
    /// An upstream node is already on the focus stack
    #[error("Cycle detected: '{node}' depends on '{upstream}', which is already being resolved")]
    CycleDetected { node: NodeId, upstream: NodeId },

    /// The connection index does not know a node it was asked about
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// No graph with this name exists in the builder
    #[error("Unknown graph: {0}")]
    UnknownGraph(String),

    /// A node's work completed in an error state
    #[error("Node '{node}' failed: {message}")]
    NodeExecutionFailed { node: NodeId, message: String },

    /// The worker pool has stopped accepting work
    #[error("Worker pool is shut down")]
    PoolShutDown,

    /// No tokio runtime is available to host the worker pool
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    /// Nothing is in flight but the run is not complete
    #[error("Run of graph '{0}' stalled with no work in flight")]
    Stalled(String),

    /// An operation required a started run
    #[error("Execution has not been started")]
    NotStarted,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DagError {
    /// Create a node execution failure with a message
    pub fn failed(node: impl Into<NodeId>, message: impl Into<String>) -> Self {
        Self::NodeExecutionFailed {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a cycle error naming both nodes
    pub fn cycle(node: impl Into<NodeId>, upstream: impl Into<NodeId>) -> Self {
        Self::CycleDetected {
            node: node.into(),
            upstream: upstream.into(),
        }
    }

    /// Whether this error aborts a resolution pass
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CycleDetected { .. })
    }
}
