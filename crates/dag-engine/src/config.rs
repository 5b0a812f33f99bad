//! Configuration for the resolution and execution engines

use serde::{Deserialize, Serialize};

use crate::error::{DagError, Result};

/// Well-known defaults
pub mod defaults {
    /// Graph used when a caller does not scope its nodes
    pub const GRAPH_NAME: &str = "default";
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Number of workers in the pool; the only concurrency bound
    pub worker_count: usize,
    /// Named graph the resolution engine writes into
    pub default_graph: String,
    /// Return control to the caller after every resolution step
    pub debug_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            default_graph: defaults::GRAPH_NAME.to_string(),
            debug_mode: false,
        }
    }
}

impl EngineConfig {
    /// Set the worker count
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the graph name the resolution engine writes into
    pub fn with_default_graph(mut self, name: impl Into<String>) -> Self {
        self.default_graph = name.into();
        self
    }

    /// Enable or disable step mode
    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    /// Reject configurations the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(DagError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.default_graph.trim().is_empty() {
            return Err(DagError::InvalidConfig(
                "default_graph must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
