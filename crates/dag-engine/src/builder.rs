//! Fluent builder for workflow graphs
//!
//! Provides a compact API for constructing graphs programmatically.

use crate::node::{Parameter, PortDataType};
use crate::types::{GraphEdge, GraphNode, WorkflowGraph};

/// Fluent builder for constructing workflow graphs
///
/// # Example
///
/// ```
/// use dag_engine::{PortDataType, WorkflowBuilder};
///
/// let graph = WorkflowBuilder::new("wf-1", "My Workflow")
///     .add_node("load", "load-image")
///     .add_node("blur", "gaussian-blur")
///     .with_input("image", PortDataType::Image)
///     .add_edge("load", "image", "blur", "image")
///     .build();
///
/// assert_eq!(graph.nodes.len(), 2);
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    edge_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            edge_counter: 0,
        }
    }

    /// Add a node to the graph
    pub fn add_node(mut self, id: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.nodes.push(GraphNode::new(id, node_type));
        self
    }

    /// Add a data parameter to the most recently added node
    ///
    /// Must be called after `add_node`.
    pub fn with_input(mut self, id: impl Into<String>, data_type: PortDataType) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.parameters.push(Parameter::new(id, data_type));
        }
        self
    }

    /// Add an execution-flow parameter to the most recently added node
    pub fn with_control(mut self, id: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.parameters.push(Parameter::control(id));
        }
        self
    }

    /// Add an edge between two nodes (auto-generates edge ID)
    pub fn add_edge(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.edge_counter += 1;
        self.edges.push(GraphEdge {
            id: format!("edge-{}", self.edge_counter),
            source: source.into(),
            source_handle: source_port.into(),
            target: target.into(),
            target_handle: target_port.into(),
        });
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(self.id, self.name);
        graph.nodes = self.nodes;
        graph.edges = self.edges;
        graph
    }
}
