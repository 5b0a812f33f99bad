//! Mutable dependency graphs and per-node runtime state
//!
//! The [`DagBuilder`] owns one or more named directed graphs plus the
//! identity map from node id to [`DagNode`]. An edge `A -> B` means "B
//! depends on the output of A".
//!
//! Nodes are keyed by identity across all graphs: a node has exactly one
//! [`DagNode`] no matter how many named graphs list it.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::error::{DagError, Result};
use crate::execution::TaskHandle;
use crate::node::{ConnectionIndex, Node, NodeId};

/// Lifecycle of a node inside a DAG run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DagNodeState {
    /// Discovered, upstream not finished yet
    Waiting,
    /// Admitted to the worker pool, not started
    Queued,
    /// A worker is running it
    Processing,
    Done,
    /// Never started because the run failed elsewhere
    Canceled,
    Errored,
}

impl DagNodeState {
    /// Whether the node will not change state again in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Errored)
    }
}

/// Runtime wrapper around a node
///
/// `task_handle` is present exactly while the state is
/// [`DagNodeState::Processing`].
#[derive(Debug)]
pub struct DagNode {
    node_id: NodeId,
    state: DagNodeState,
    task_handle: Option<TaskHandle>,
    output: Option<serde_json::Value>,
    error: Option<String>,
}

impl DagNode {
    fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            state: DagNodeState::Waiting,
            task_handle: None,
            output: None,
            error: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> DagNodeState {
        self.state
    }

    pub fn task_handle(&self) -> Option<&TaskHandle> {
        self.task_handle.as_ref()
    }

    /// Value returned by a successful run
    pub fn output(&self) -> Option<&serde_json::Value> {
        self.output.as_ref()
    }

    /// Message of a failed run
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn task_handle_mut(&mut self) -> Option<&mut TaskHandle> {
        self.task_handle.as_mut()
    }

    /// Move to a state without a task handle, releasing any handle held
    pub(crate) fn set_state(&mut self, state: DagNodeState) -> Option<TaskHandle> {
        debug_assert!(state != DagNodeState::Processing);
        self.state = state;
        self.task_handle.take()
    }

    /// A worker picked the node up
    pub(crate) fn begin_processing(&mut self, handle: TaskHandle) {
        self.state = DagNodeState::Processing;
        self.task_handle = Some(handle);
    }

    pub(crate) fn complete(&mut self, output: serde_json::Value) {
        self.set_state(DagNodeState::Done);
        self.output = Some(output);
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.set_state(DagNodeState::Errored);
        self.error = Some(message.into());
    }

    /// Back to WAITING for a fresh run
    pub(crate) fn rearm(&mut self) {
        self.set_state(DagNodeState::Waiting);
        self.output = None;
        self.error = None;
    }
}

/// One named dependency graph
#[derive(Debug, Default)]
struct NamedGraph {
    graph: DiGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl NamedGraph {
    fn insert(&mut self, node_id: &str) -> bool {
        if self.indices.contains_key(node_id) {
            return false;
        }
        let index = self.graph.add_node(node_id.to_string());
        self.indices.insert(node_id.to_string(), index);
        true
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<NodeId> {
        let Some(&index) = self.indices.get(node_id) else {
            return Vec::new();
        };
        let mut ids: Vec<NodeId> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|i| self.graph[i].clone())
            .collect();
        // petgraph yields neighbors newest-first
        ids.reverse();
        ids
    }
}

/// Owner of the named dependency graphs and the identity map
#[derive(Debug)]
pub struct DagBuilder {
    graphs: HashMap<String, NamedGraph>,
    nodes: HashMap<NodeId, DagNode>,
    default_graph: String,
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DagBuilder {
    /// Create a builder whose unscoped operations use the "default" graph
    pub fn new() -> Self {
        Self::with_default_graph(defaults::GRAPH_NAME)
    }

    /// Create a builder with a custom default graph name
    pub fn with_default_graph(name: impl Into<String>) -> Self {
        Self {
            graphs: HashMap::new(),
            nodes: HashMap::new(),
            default_graph: name.into(),
        }
    }

    pub fn default_graph(&self) -> &str {
        &self.default_graph
    }

    /// Change the graph unscoped operations use
    pub fn set_default_graph(&mut self, name: &str) {
        self.default_graph = name.to_string();
    }

    /// Add a node to the default graph
    pub fn add_node(&mut self, node_id: &str) -> &DagNode {
        let graph = self.default_graph.clone();
        self.add_node_to(&graph, node_id)
    }

    /// Add a node to a named graph
    ///
    /// Idempotent: a node already in the graph is returned untouched.
    pub fn add_node_to(&mut self, graph: &str, node_id: &str) -> &DagNode {
        self.insert(graph, node_id);
        &self.nodes[node_id]
    }

    /// Insert into the graph and identity map; `true` if anything was added
    fn insert(&mut self, graph: &str, node_id: &str) -> bool {
        let added_to_graph = self
            .graphs
            .entry(graph.to_string())
            .or_default()
            .insert(node_id);
        if !added_to_graph {
            return false;
        }
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| DagNode::new(node_id));
        log::debug!("DAG '{}': added node '{}'", graph, node_id);
        true
    }

    /// Add an edge `from -> to`; both nodes must already be in the graph
    ///
    /// Adding an existing edge again is a no-op.
    pub fn add_edge(&mut self, graph: &str, from: &str, to: &str) -> Result<()> {
        let named = self
            .graphs
            .get_mut(graph)
            .ok_or_else(|| DagError::UnknownGraph(graph.to_string()))?;
        let a = *named
            .indices
            .get(from)
            .ok_or_else(|| DagError::UnknownNode(from.to_string()))?;
        let b = *named
            .indices
            .get(to)
            .ok_or_else(|| DagError::UnknownNode(to.to_string()))?;
        if named.graph.find_edge(a, b).is_none() {
            named.graph.add_edge(a, b, ());
        }
        Ok(())
    }

    /// Add a node together with everything it depends on
    ///
    /// Upstream nodes are inserted before the nodes that depend on them.
    /// Returns the nodes this call inserted, in the order they were finalized.
    /// Cyclic connection data terminates: a node visited earlier in this call
    /// is not descended into again, but the edge to it is still recorded.
    pub fn add_node_with_dependencies<G: ConnectionIndex>(
        &mut self,
        index: &G,
        graph: &str,
        node_id: &str,
    ) -> Result<Vec<NodeId>> {
        let mut visited = HashSet::new();
        let mut added = Vec::new();
        self.add_with_dependencies(index, graph, node_id, &mut visited, &mut added)?;
        Ok(added)
    }

    fn add_with_dependencies<G: ConnectionIndex>(
        &mut self,
        index: &G,
        graph: &str,
        node_id: &str,
        visited: &mut HashSet<NodeId>,
        added: &mut Vec<NodeId>,
    ) -> Result<()> {
        visited.insert(node_id.to_string());

        let node = index
            .node(node_id)
            .ok_or_else(|| DagError::UnknownNode(node_id.to_string()))?;
        let upstream: Vec<NodeId> = node
            .parameters()
            .iter()
            .filter(|p| !p.is_control())
            .filter_map(|p| index.connected_node(node_id, &p.id))
            .map(|c| c.node)
            .collect();

        // Present before recursing so back-edges of a cycle have both ends
        let inserted = self.insert(graph, node_id);

        for up in &upstream {
            if !visited.contains(up) {
                self.add_with_dependencies(index, graph, up, visited, added)?;
            }
        }
        for up in &upstream {
            if self.graph_contains(graph, up) {
                self.add_edge(graph, up, node_id)?;
            }
        }

        if inserted {
            added.push(node_id.to_string());
        }
        Ok(())
    }

    /// Empty every graph and the identity map, releasing all task handles
    pub fn clear(&mut self) {
        self.graphs.clear();
        self.nodes.clear();
    }

    /// Whether a node has a DagNode in any graph
    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Whether a named graph lists the node
    pub fn graph_contains(&self, graph: &str, node_id: &str) -> bool {
        self.graphs
            .get(graph)
            .is_some_and(|g| g.indices.contains_key(node_id))
    }

    pub fn get(&self, node_id: &str) -> Option<&DagNode> {
        self.nodes.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut DagNode> {
        self.nodes.get_mut(node_id)
    }

    /// Number of DagNodes across all graphs
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of named graphs
    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    /// Read-only view of a named graph
    pub fn graph(&self, name: &str) -> Option<&DiGraph<NodeId, ()>> {
        self.graphs.get(name).map(|g| &g.graph)
    }

    pub fn has_graph(&self, graph: &str) -> bool {
        self.graphs.contains_key(graph)
    }

    /// Names of all graphs, sorted
    pub fn graph_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graphs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Node ids of a graph in insertion order
    pub fn node_ids(&self, graph: &str) -> Vec<NodeId> {
        self.graphs
            .get(graph)
            .map(|g| g.graph.node_weights().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes that `node_id` depends on
    pub fn upstream_of(&self, graph: &str, node_id: &str) -> Vec<NodeId> {
        self.graphs
            .get(graph)
            .map(|g| g.neighbors(node_id, Direction::Incoming))
            .unwrap_or_default()
    }

    /// Nodes that depend on `node_id`
    pub fn downstream_of(&self, graph: &str, node_id: &str) -> Vec<NodeId> {
        self.graphs
            .get(graph)
            .map(|g| g.neighbors(node_id, Direction::Outgoing))
            .unwrap_or_default()
    }

    pub fn edge_count(&self, graph: &str) -> usize {
        self.graphs.get(graph).map_or(0, |g| g.graph.edge_count())
    }

    /// Dependency order of a graph
    ///
    /// Graphs built by the resolution engine are acyclic; this only fails for
    /// edges a caller inserted by hand.
    pub fn topological_order(&self, graph: &str) -> Result<Vec<NodeId>> {
        let named = self
            .graphs
            .get(graph)
            .ok_or_else(|| DagError::UnknownGraph(graph.to_string()))?;
        match toposort(&named.graph, None) {
            Ok(order) => Ok(order.into_iter().map(|i| named.graph[i].clone()).collect()),
            Err(cycle) => {
                let node = named.graph[cycle.node_id()].clone();
                let upstream = named
                    .neighbors(&node, Direction::Incoming)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| node.clone());
                Err(DagError::cycle(node, upstream))
            }
        }
    }
}
