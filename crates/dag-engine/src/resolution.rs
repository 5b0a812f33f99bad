//! Resolution state machine
//!
//! Walks a node graph depth-first from a target node and materializes the
//! target's upstream closure into the [`DagBuilder`](crate::dag::DagBuilder)
//! without executing anything.
//!
//! # States
//!
//! - **InitializeSpotlight**: mark the focused node RESOLVING and reset its
//!   parameter cursor
//! - **EvaluateParameter**: look at the parameter under the cursor; descend
//!   into an unresolved upstream node, or advance the cursor
//! - **BuildNode**: record the node and its incoming edges, mark it RESOLVED,
//!   pop the focus stack
//! - **Complete**: the target and everything it needs are in the DAG
//!
//! The focus stack is the traversal's explicit call stack. A node identity
//! may appear on it at most once; meeting one again is a dependency cycle.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::DagContext;
use crate::error::{DagError, Result};
use crate::events::{EventSink, WorkflowEvent};
use crate::node::{ConnectionIndex, Node, NodeId, ParameterId, ResolutionState};

/// States of the resolution state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPhase {
    InitializeSpotlight,
    EvaluateParameter,
    BuildNode,
    Complete,
}

/// One entry of the focus stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    pub node: NodeId,
    /// Parameter whose upstream node is being resolved above this entry
    pub awaiting: Option<ParameterId>,
}

/// Depth-first path from the target node to the node being resolved
#[derive(Debug, Default)]
pub struct FocusStack {
    entries: Vec<Focus>,
    members: HashSet<NodeId>,
}

impl FocusStack {
    /// Push a node; returns `false` if it is already on the stack
    pub fn push(&mut self, node: impl Into<NodeId>) -> bool {
        let node = node.into();
        if !self.members.insert(node.clone()) {
            return false;
        }
        self.entries.push(Focus {
            node,
            awaiting: None,
        });
        true
    }

    pub fn pop(&mut self) -> Option<Focus> {
        let focus = self.entries.pop()?;
        self.members.remove(&focus.node);
        Some(focus)
    }

    pub fn top(&self) -> Option<&Focus> {
        self.entries.last()
    }

    fn top_mut(&mut self) -> Option<&mut Focus> {
        self.entries.last_mut()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.members.contains(node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from the target node down to the current focus
    pub fn iter(&self) -> impl Iterator<Item = &Focus> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.members.clear();
    }
}

/// Builds the dependency DAG for a target node
pub struct ResolutionEngine {
    phase: Option<ResolutionPhase>,
    focus: FocusStack,
    target: Option<NodeId>,
    graph: String,
    debug_mode: bool,
    event_sink: Arc<dyn EventSink>,
}

impl ResolutionEngine {
    /// Create an engine that writes into `config.default_graph`
    pub fn new(config: &EngineConfig, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            phase: None,
            focus: FocusStack::default(),
            target: None,
            graph: config.default_graph.clone(),
            debug_mode: config.debug_mode,
            event_sink,
        }
    }

    /// Step mode: return to the caller after every state entry
    pub fn set_debug_mode(&mut self, debug_mode: bool) {
        self.debug_mode = debug_mode;
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn phase(&self) -> Option<ResolutionPhase> {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Some(ResolutionPhase::Complete)
    }

    pub fn focus(&self) -> &FocusStack {
        &self.focus
    }

    /// Node the current pass started from
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Name of the graph this engine writes into
    pub fn graph_name(&self) -> &str {
        &self.graph
    }

    /// Forget the current pass
    ///
    /// Nodes left RESOLVING by an aborted pass are treated as unresolved by
    /// the next one.
    pub fn reset(&mut self) {
        self.phase = None;
        self.focus.clear();
        self.target = None;
    }

    /// Resolve `node_id` into the context's DAG builder.
    ///
    /// Runs to completion, or in debug mode advances a single step per call.
    /// Calling this while a paused pass is in progress continues that pass;
    /// calling it after completion starts a fresh one. A fresh pass makes
    /// this engine's graph the builder's default graph, so
    /// [`ExecutionEngine::start`](crate::execution::ExecutionEngine::start)
    /// runs what was just resolved.
    pub fn build_dag_for_node<G: ConnectionIndex>(
        &mut self,
        ctx: &mut DagContext,
        index: &mut G,
        node_id: &str,
    ) -> Result<()> {
        match self.phase {
            None | Some(ResolutionPhase::Complete) => self.begin(ctx, index, node_id)?,
            Some(_) => {
                if self.target.as_deref() != Some(node_id) {
                    log::debug!(
                        "Resolution of '{}' in progress; ignoring request for '{}'",
                        self.target.as_deref().unwrap_or_default(),
                        node_id
                    );
                }
            }
        }

        while let Some(phase) = self.phase {
            if phase == ResolutionPhase::Complete {
                break;
            }
            let next = self.step(ctx, index, phase)?;
            log::debug!("Resolution: {:?} -> {:?}", phase, next);
            self.phase = Some(next);
            if self.debug_mode {
                break;
            }
        }
        Ok(())
    }

    fn begin<G: ConnectionIndex>(
        &mut self,
        ctx: &mut DagContext,
        index: &mut G,
        node_id: &str,
    ) -> Result<()> {
        let node = index
            .node(node_id)
            .ok_or_else(|| DagError::UnknownNode(node_id.to_string()))?;
        if node.resolution_state() != ResolutionState::Unresolved {
            index.unresolve_future_nodes(node_id);
        }

        self.focus.clear();
        self.focus.push(node_id);
        self.target = Some(node_id.to_string());
        self.phase = Some(ResolutionPhase::InitializeSpotlight);
        ctx.builder.set_default_graph(&self.graph);
        log::debug!("Resolving '{}' into graph '{}'", node_id, self.graph);
        Ok(())
    }

    fn step<G: ConnectionIndex>(
        &mut self,
        ctx: &mut DagContext,
        index: &mut G,
        phase: ResolutionPhase,
    ) -> Result<ResolutionPhase> {
        // Nothing focused means nothing left to resolve
        let Some(id) = self.focus.top().map(|f| f.node.clone()) else {
            return Ok(ResolutionPhase::Complete);
        };
        match phase {
            ResolutionPhase::InitializeSpotlight => self.initialize_spotlight(index, id),
            ResolutionPhase::EvaluateParameter => self.evaluate_parameter(index, id),
            ResolutionPhase::BuildNode => self.build_node(ctx, index, id),
            ResolutionPhase::Complete => Ok(ResolutionPhase::Complete),
        }
    }

    fn initialize_spotlight<G: ConnectionIndex>(
        &mut self,
        index: &mut G,
        id: NodeId,
    ) -> Result<ResolutionPhase> {
        self.emit(WorkflowEvent::NodeFocused {
            node_id: id.clone(),
            depth: self.focus.len(),
        });

        let node = index
            .node_mut(&id)
            .ok_or_else(|| DagError::UnknownNode(id.clone()))?;
        if node.resolution_state() != ResolutionState::Resolved {
            node.set_resolution_state(ResolutionState::Resolving);
            node.initialize_spotlight();
        }

        if node.current_parameter().is_none() && !node.advance_parameter() {
            return Ok(ResolutionPhase::BuildNode);
        }
        Ok(ResolutionPhase::EvaluateParameter)
    }

    fn evaluate_parameter<G: ConnectionIndex>(
        &mut self,
        index: &mut G,
        id: NodeId,
    ) -> Result<ResolutionPhase> {
        let node = index
            .node(&id)
            .ok_or_else(|| DagError::UnknownNode(id.clone()))?;
        let Some(parameter) = node.current_parameter() else {
            return Ok(ResolutionPhase::BuildNode);
        };
        let parameter_id = parameter.id.clone();
        let is_control = parameter.is_control();

        self.emit(WorkflowEvent::ParameterFocused {
            node_id: id.clone(),
            parameter: parameter_id.clone(),
        });

        if !is_control {
            if let Some(connection) = index.connected_node(&id, &parameter_id) {
                let upstream = index
                    .node(&connection.node)
                    .ok_or_else(|| DagError::UnknownNode(connection.node.clone()))?;
                if upstream.resolution_state() != ResolutionState::Resolved {
                    if self.focus.contains(&connection.node) {
                        log::warn!(
                            "Cycle: '{}' ({}) depends on '{}'",
                            id,
                            parameter_id,
                            connection.node
                        );
                        return Err(DagError::cycle(id, connection.node));
                    }
                    if let Some(top) = self.focus.top_mut() {
                        top.awaiting = Some(parameter_id);
                    }
                    self.focus.push(connection.node);
                    return Ok(ResolutionPhase::InitializeSpotlight);
                }
            }
        }

        let node = index
            .node_mut(&id)
            .ok_or_else(|| DagError::UnknownNode(id.clone()))?;
        if node.advance_parameter() {
            Ok(ResolutionPhase::EvaluateParameter)
        } else {
            Ok(ResolutionPhase::BuildNode)
        }
    }

    fn build_node<G: ConnectionIndex>(
        &mut self,
        ctx: &mut DagContext,
        index: &mut G,
        id: NodeId,
    ) -> Result<ResolutionPhase> {
        let node = index
            .node(&id)
            .ok_or_else(|| DagError::UnknownNode(id.clone()))?;
        let upstream: Vec<NodeId> = node
            .parameters()
            .iter()
            .filter(|p| !p.is_control())
            .filter_map(|p| index.connected_node(&id, &p.id))
            .map(|c| c.node)
            .collect();

        for up in &upstream {
            if !ctx.builder.graph_contains(&self.graph, up) {
                // Resolved by an earlier pass whose DAG has since been cleared
                ctx.builder
                    .add_node_with_dependencies(&*index, &self.graph, up)?;
            }
        }
        ctx.builder.add_node_to(&self.graph, &id);
        for up in &upstream {
            ctx.builder.add_edge(&self.graph, up, &id)?;
        }

        if let Some(node) = index.node_mut(&id) {
            node.set_resolution_state(ResolutionState::Resolved);
        }
        self.focus.pop();
        self.emit(WorkflowEvent::NodeResolved { node_id: id });

        let Some(top) = self.focus.top_mut() else {
            let target = self.target.clone().unwrap_or_default();
            log::debug!(
                "Resolved '{}': {} node(s) in graph '{}'",
                target,
                ctx.builder.node_ids(&self.graph).len(),
                self.graph
            );
            self.emit(WorkflowEvent::ResolutionCompleted {
                node_id: target,
                graph: self.graph.clone(),
                node_count: ctx.builder.node_ids(&self.graph).len(),
            });
            return Ok(ResolutionPhase::Complete);
        };
        top.awaiting = None;
        let resumed = top.node.clone();
        self.emit(WorkflowEvent::NodeFocused {
            node_id: resumed,
            depth: self.focus.len(),
        });
        Ok(ResolutionPhase::EvaluateParameter)
    }

    fn emit(&self, event: WorkflowEvent) {
        let _ = self.event_sink.send(event);
    }
}
