//! DAG Engine - dependency resolution and parallel execution for node graphs
//!
//! This crate turns a user-edited node graph into an executable dependency
//! DAG and runs it on a bounded worker pool. It supports:
//!
//! - Lazy, depth-first resolution of only what a target node needs
//! - Cycle detection while resolving
//! - Step-by-step resolution for debugging
//! - Bounded parallel execution with fail-fast draining
//!
//! # Architecture
//!
//! Two cooperating state machines share a [`DagContext`]:
//!
//! - [`ResolutionEngine`]: walks the node graph from a target node and fills
//!   the [`DagBuilder`] with the target's upstream closure
//! - [`ExecutionEngine`]: admits ready DAG nodes onto a [`WorkerPool`] and
//!   reacts to completions until the run completes or fails
//!
//! The node graph itself is reached through the [`Node`] and
//! [`ConnectionIndex`] traits; [`WorkflowGraph`] implements both.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dag_engine::{DagContext, EngineConfig, ExecutionEngine, NullEventSink, ResolutionEngine};
//!
//! let config = EngineConfig::default();
//! let mut ctx = DagContext::from_config(&config);
//! let mut resolver = ResolutionEngine::new(&config, Arc::new(NullEventSink));
//! resolver.build_dag_for_node(&mut ctx, &mut graph, "output")?;
//!
//! let mut engine = ExecutionEngine::from_config(&config, executor, Arc::new(NullEventSink))?;
//! engine.start(&mut ctx)?;
//! engine.run(&mut ctx).await?;
//! ```

pub mod builder;
pub mod config;
pub mod context;
pub mod dag;
pub mod error;
pub mod events;
pub mod execution;
pub mod node;
pub mod resolution;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use config::EngineConfig;
pub use context::{DagContext, ExecutionContext};
pub use dag::{DagBuilder, DagNode, DagNodeState};
pub use error::{DagError, Result};
pub use events::{EventSink, NullEventSink, VecEventSink, WorkflowEvent};
pub use execution::{
    ExecutionEngine, ExecutionPhase, TaskExecutor, TaskHandle, TaskOutcome, TaskPoll, WorkerPool,
};
pub use node::{
    Connection, ConnectionIndex, Node, NodeId, Parameter, ParameterId, PortDataType,
    ResolutionState,
};
pub use resolution::{Focus, FocusStack, ResolutionEngine, ResolutionPhase};
pub use types::{GraphEdge, GraphNode, WorkflowGraph};
pub use validation::{validate_workflow, ValidationError};
