//! Per-workflow state shared by the resolution and execution engines
//!
//! A [`DagContext`] is created by the caller (typically one per active
//! workflow run) and passed by `&mut` to both state machines.

use std::collections::{BTreeSet, HashMap};

use crate::config::EngineConfig;
use crate::dag::DagBuilder;
use crate::execution::TaskHandle;
use crate::node::NodeId;

/// Bookkeeping for the current execution run
#[derive(Debug, Default)]
pub struct ExecutionContext {
    run_id: Option<String>,
    active_graph: Option<String>,
    error_message: Option<String>,
    /// Nodes that were PROCESSING when the run started draining
    pub(crate) still_running: BTreeSet<NodeId>,
    /// Handles of QUEUED nodes no worker has begun yet
    pub(crate) queued: HashMap<NodeId, TaskHandle>,
}

impl ExecutionContext {
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Name of the graph being executed
    pub fn active_graph(&self) -> Option<&str> {
        self.active_graph.as_deref()
    }

    /// Message of the first failure in this run
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn still_running(&self) -> impl Iterator<Item = &NodeId> {
        self.still_running.iter()
    }

    pub(crate) fn begin(&mut self, run_id: String, graph: &str) {
        self.reset();
        self.run_id = Some(run_id);
        self.active_graph = Some(graph.to_string());
    }

    /// Keep only the first failure
    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        if self.error_message.is_none() {
            self.error_message = Some(message.into());
        }
    }

    pub fn reset(&mut self) {
        self.run_id = None;
        self.active_graph = None;
        self.error_message = None;
        self.still_running.clear();
        self.queued.clear();
    }
}

/// DAG builder plus execution bookkeeping for one workflow
#[derive(Debug, Default)]
pub struct DagContext {
    pub builder: DagBuilder,
    pub execution: ExecutionContext,
}

impl DagContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context whose builder writes to the configured default graph
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            builder: DagBuilder::with_default_graph(config.default_graph.clone()),
            execution: ExecutionContext::default(),
        }
    }

    /// Drop all graphs and run state
    pub fn clear(&mut self) {
        self.execution.reset();
        self.builder.clear();
    }
}
