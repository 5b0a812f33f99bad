//! Structural checks for workflow graphs
//!
//! Advisory only: resolution does not require a validated graph, and reports
//! cycles on its own as it finds them.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::WorkflowGraph;

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Cycle detected in the graph
    CycleDetected,
    /// An edge references a non-existent node
    UnknownNode { edge_id: String, node_id: String },
    /// An edge targets a parameter the node does not declare
    UnknownParameter {
        edge_id: String,
        node_id: String,
        parameter: String,
    },
    /// More than one edge feeds the same parameter
    DuplicateInput {
        edge_id: String,
        node_id: String,
        parameter: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "Cycle detected in graph"),
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::UnknownParameter {
                edge_id,
                node_id,
                parameter,
            } => write!(
                f,
                "Edge '{}' targets unknown parameter '{}' on node '{}'",
                edge_id, parameter, node_id
            ),
            Self::DuplicateInput {
                edge_id,
                node_id,
                parameter,
            } => write!(
                f,
                "Edge '{}' is a second connection into '{}' on node '{}'",
                edge_id, parameter, node_id
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a workflow graph
///
/// Returns all validation errors found (not just the first).
pub fn validate_workflow(graph: &WorkflowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_edge_references(graph, &mut errors);
    validate_edge_targets(graph, &mut errors);
    detect_cycles(graph, &mut errors);

    errors
}

/// Check that all edge source/target nodes exist
fn validate_edge_references(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &graph.edges {
        if !node_ids.contains(edge.source.as_str()) {
            errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        if !node_ids.contains(edge.target.as_str()) {
            errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            });
        }
    }
}

/// Each edge must land on a declared parameter, at most once per parameter
fn validate_edge_targets(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let mut fed: HashSet<(&str, &str)> = HashSet::new();

    for edge in &graph.edges {
        let Some(target) = graph.find_node(&edge.target) else {
            continue;
        };
        if !target.has_parameter(&edge.target_handle) {
            errors.push(ValidationError::UnknownParameter {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
                parameter: edge.target_handle.clone(),
            });
            continue;
        }
        if !fed.insert((edge.target.as_str(), edge.target_handle.as_str())) {
            errors.push(ValidationError::DuplicateInput {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
                parameter: edge.target_handle.clone(),
            });
        }
    }
}

/// Detect cycles using Kahn's algorithm (topological sort)
fn detect_cycles(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in &graph.nodes {
        in_degree.insert(&node.id, 0);
    }
    for edge in &graph.edges {
        *in_degree.entry(&edge.target).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut visited = 0;
    while let Some(node_id) = queue.pop_front() {
        visited += 1;
        for edge in graph.outgoing_edges(node_id) {
            if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(&edge.target);
                }
            }
        }
    }

    if visited < in_degree.len() {
        errors.push(ValidationError::CycleDetected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::node::PortDataType;

    #[test]
    fn test_valid_graph() {
        let graph = WorkflowBuilder::new("test", "Test")
            .add_node("a", "load")
            .add_node("b", "blur")
            .with_input("image", PortDataType::Image)
            .add_edge("a", "image", "b", "image")
            .build();

        assert!(validate_workflow(&graph).is_empty());
    }

    #[test]
    fn test_detect_cycle() {
        let graph = WorkflowBuilder::new("test", "Test")
            .add_node("a", "x")
            .with_input("in", PortDataType::Any)
            .add_node("b", "x")
            .with_input("in", PortDataType::Any)
            .add_edge("a", "out", "b", "in")
            .add_edge("b", "out", "a", "in")
            .build();

        let errors = validate_workflow(&graph);
        assert!(errors.contains(&ValidationError::CycleDetected));
    }

    #[test]
    fn test_no_cycle_diamond() {
        let graph = WorkflowBuilder::new("test", "Test")
            .add_node("src", "x")
            .add_node("left", "x")
            .with_input("in", PortDataType::Any)
            .add_node("right", "x")
            .with_input("in", PortDataType::Any)
            .add_node("out", "x")
            .with_input("l", PortDataType::Any)
            .with_input("r", PortDataType::Any)
            .add_edge("src", "out", "left", "in")
            .add_edge("src", "out", "right", "in")
            .add_edge("left", "out", "out", "l")
            .add_edge("right", "out", "out", "r")
            .build();

        assert!(validate_workflow(&graph).is_empty());
    }

    #[test]
    fn test_edge_references_missing_node() {
        let graph = WorkflowBuilder::new("test", "Test")
            .add_node("a", "x")
            .add_edge("a", "out", "ghost", "in")
            .build();

        let errors = validate_workflow(&graph);
        assert_eq!(
            errors,
            vec![ValidationError::UnknownNode {
                edge_id: "edge-1".to_string(),
                node_id: "ghost".to_string(),
            }]
        );
    }

    #[test]
    fn test_unknown_and_duplicate_parameters() {
        let graph = WorkflowBuilder::new("test", "Test")
            .add_node("a", "x")
            .add_node("b", "x")
            .add_node("c", "x")
            .with_input("in", PortDataType::Any)
            .add_edge("a", "out", "c", "in")
            .add_edge("b", "out", "c", "in")
            .add_edge("b", "out", "c", "missing")
            .build();

        let errors = validate_workflow(&graph);
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            &errors[0],
            ValidationError::DuplicateInput { parameter, .. } if parameter == "in"
        ));
        assert!(matches!(
            &errors[1],
            ValidationError::UnknownParameter { parameter, .. } if parameter == "missing"
        ));
        assert!(errors[1].to_string().contains("'missing'"));
    }
}
