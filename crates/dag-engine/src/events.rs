//! Event types for resolution and execution progress
//!
//! Events are sent from the engines to the editor (or any consumer) to
//! highlight the node and parameter under resolution and to report node
//! state changes while a DAG runs.

use serde::{Deserialize, Serialize};

use crate::dag::DagNodeState;
use crate::node::NodeId;

/// Trait for sending workflow events
///
/// This abstracts over the transport mechanism (UI channel, mpsc, etc.)
/// allowing the engines to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// Events emitted while resolving and executing a DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// The resolution engine moved its focus to a node
    #[serde(rename_all = "camelCase")]
    NodeFocused { node_id: NodeId, depth: usize },

    /// The resolution engine is evaluating a parameter
    #[serde(rename_all = "camelCase")]
    ParameterFocused { node_id: NodeId, parameter: String },

    /// A node and its upstream closure are in the DAG
    #[serde(rename_all = "camelCase")]
    NodeResolved { node_id: NodeId },

    /// Resolution of a target node finished
    #[serde(rename_all = "camelCase")]
    ResolutionCompleted {
        node_id: NodeId,
        graph: String,
        node_count: usize,
    },

    /// A DAG run started
    #[serde(rename_all = "camelCase")]
    RunStarted {
        run_id: String,
        graph: String,
        node_count: usize,
    },

    /// A node changed lifecycle state
    #[serde(rename_all = "camelCase")]
    NodeStateChanged {
        run_id: String,
        node_id: NodeId,
        state: DagNodeState,
    },

    /// Every node finished successfully
    #[serde(rename_all = "camelCase")]
    RunCompleted { run_id: String },

    /// The run drained after a failure
    #[serde(rename_all = "camelCase")]
    RunFailed {
        run_id: String,
        error: String,
        canceled: Vec<NodeId>,
    },
}

impl WorkflowEvent {
    /// Create a node state change event
    pub fn node_state(run_id: &str, node_id: &str, state: DagNodeState) -> Self {
        Self::NodeStateChanged {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            state,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        let mut events = self.events.lock().map_err(|_| EventError {
            message: "Event buffer poisoned".to_string(),
        })?;
        events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(WorkflowEvent::node_state("run1", "a", DagNodeState::Processing))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);

        match &events[0] {
            WorkflowEvent::NodeStateChanged { node_id, state, .. } => {
                assert_eq!(node_id, "a");
                assert_eq!(*state, DagNodeState::Processing);
            }
            _ => panic!("Expected NodeStateChanged event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        sink.send(WorkflowEvent::NodeResolved {
            node_id: "a".to_string(),
        })
        .unwrap();
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = WorkflowEvent::ParameterFocused {
            node_id: "blur".to_string(),
            parameter: "radius".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "parameterFocused");
        assert_eq!(json["nodeId"], "blur");
    }
}
