//! In-memory workflow graph
//!
//! These types define a workflow graph the engine can resolve directly:
//! nodes with ports, edges between ports, and per-node resolution state.
//! Editors with their own node storage implement [`Node`] and
//! [`ConnectionIndex`] instead.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::{Connection, ConnectionIndex, Node, NodeId, Parameter, ParameterId, ResolutionState};

/// Unique identifier for an edge
pub type EdgeId = String;

/// An edge connecting an output port to an input parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Source port ID
    pub source_handle: ParameterId,
    /// Target node ID
    pub target: NodeId,
    /// Target parameter ID
    pub target_handle: ParameterId,
}

/// A node instance in a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Node type in the editor's catalog
    pub node_type: String,
    /// Input parameters, in the order they are walked
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub resolution: ResolutionState,
    /// Spotlight position into `parameters`
    #[serde(skip)]
    spotlight: Option<usize>,
}

impl GraphNode {
    /// Create a node with no parameters
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            parameters: Vec::new(),
            resolution: ResolutionState::Unresolved,
            spotlight: None,
        }
    }

    /// Append a parameter
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Check whether the node declares a parameter
    pub fn has_parameter(&self, id: &str) -> bool {
        self.parameters.iter().any(|p| p.id == id)
    }
}

impl Node for GraphNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn resolution_state(&self) -> ResolutionState {
        self.resolution
    }

    fn set_resolution_state(&mut self, state: ResolutionState) {
        self.resolution = state;
    }

    fn initialize_spotlight(&mut self) -> bool {
        self.spotlight = if self.parameters.is_empty() { None } else { Some(0) };
        self.spotlight.is_some()
    }

    fn current_parameter(&self) -> Option<&Parameter> {
        self.spotlight.and_then(|i| self.parameters.get(i))
    }

    fn advance_parameter(&mut self) -> bool {
        match self.spotlight {
            Some(i) if i + 1 < self.parameters.len() => {
                self.spotlight = Some(i + 1);
                true
            }
            _ => {
                self.spotlight = None;
                false
            }
        }
    }
}

/// A complete workflow graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Unique identifier for this graph
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Nodes in the graph
    pub nodes: Vec<GraphNode>,
    /// Edges connecting nodes
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Parse a graph saved by the editor
    ///
    /// Resolution state is kept as saved; spotlight cursors start empty.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn get_dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.outgoing_edges(node_id)
            .map(|e| e.target.clone())
            .collect()
    }

    /// Resolution state of a node, if it exists
    pub fn resolution_state(&self, node_id: &str) -> Option<ResolutionState> {
        self.find_node(node_id).map(|n| n.resolution)
    }
}

impl ConnectionIndex for WorkflowGraph {
    type Node = GraphNode;

    fn node(&self, id: &str) -> Option<&GraphNode> {
        self.find_node(id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.find_node_mut(id)
    }

    fn connected_node(&self, node: &str, parameter: &str) -> Option<Connection> {
        self.incoming_edges(node)
            .find(|e| e.target_handle == parameter)
            .map(|e| Connection::new(e.source.clone(), e.source_handle.clone()))
    }

    fn unresolve_future_nodes(&mut self, node: &str) {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::from([node.to_string()]);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for dependent in self.get_dependents(&current) {
                queue.push_back(dependent);
            }
            if let Some(n) = self.find_node_mut(&current) {
                n.resolution = ResolutionState::Unresolved;
            }
        }
    }
}
