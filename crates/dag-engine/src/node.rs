//! Contracts the engine consumes from the node graph
//!
//! Nodes and their connections are owned by the editor, not by this crate.
//! The engine only needs a small surface from them:
//!
//! - [`Node`]: ordered parameters, a resolution state, and a spotlight cursor
//!   that walks the parameters one at a time
//! - [`ConnectionIndex`]: node lookup by identity plus "which upstream port
//!   feeds this parameter"
//!
//! [`crate::types::WorkflowGraph`] is an in-memory implementation of both.

use serde::{Deserialize, Serialize};

/// Stable identity of a node, used as a map and graph key
pub type NodeId = String;

/// Name of a parameter (port) on a node
pub type ParameterId = String;

/// How far a node has progressed through dependency resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    /// Not yet visited, or invalidated by an upstream change
    #[default]
    Unresolved,
    /// On the focus stack, parameters being walked
    Resolving,
    /// All upstream dependencies are in the DAG
    Resolved,
}

/// The data type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDataType {
    /// Accepts any type
    Any,
    /// Text string
    String,
    /// Numeric value
    Number,
    /// Boolean value
    Boolean,
    /// JSON object
    Json,
    /// Image data
    Image,
    /// Audio data
    Audio,
    /// Video data
    Video,
    /// Execution-flow pin, never a data dependency
    Control,
}

impl PortDataType {
    /// Control pins are excluded from dependency-edge computation
    pub fn is_control(&self) -> bool {
        matches!(self, PortDataType::Control)
    }
}

/// A parameter on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Parameter identifier, unique within its node
    pub id: ParameterId,
    /// Data type of the parameter
    pub data_type: PortDataType,
}

impl Parameter {
    /// Create a data parameter
    pub fn new(id: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            id: id.into(),
            data_type,
        }
    }

    /// Create an execution-flow parameter
    pub fn control(id: impl Into<String>) -> Self {
        Self::new(id, PortDataType::Control)
    }

    /// Whether this parameter is an execution-flow pin
    pub fn is_control(&self) -> bool {
        self.data_type.is_control()
    }
}

/// The upstream end of a connection feeding a parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Node producing the value
    pub node: NodeId,
    /// Output parameter on that node
    pub parameter: ParameterId,
}

impl Connection {
    pub fn new(node: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            parameter: parameter.into(),
        }
    }
}

/// A node as seen by the resolution engine
pub trait Node {
    /// Stable identity
    fn id(&self) -> &str;

    /// All parameters in declaration order
    fn parameters(&self) -> &[Parameter];

    fn resolution_state(&self) -> ResolutionState;

    fn set_resolution_state(&mut self, state: ResolutionState);

    /// Reset the spotlight to the first parameter.
    ///
    /// Returns `true` if there is at least one parameter to visit.
    fn initialize_spotlight(&mut self) -> bool;

    /// Parameter under the spotlight, if any
    fn current_parameter(&self) -> Option<&Parameter>;

    /// Move the spotlight to the next parameter.
    ///
    /// Returns `false` once the parameters are exhausted; the cursor then has
    /// no current parameter.
    fn advance_parameter(&mut self) -> bool;
}

/// Node storage plus the incoming-connection lookup
pub trait ConnectionIndex {
    type Node: Node;

    /// Look up a node by identity
    fn node(&self, id: &str) -> Option<&Self::Node>;

    /// Look up a node by identity (mutable)
    fn node_mut(&mut self, id: &str) -> Option<&mut Self::Node>;

    /// The upstream node and parameter feeding `parameter` on `node`
    fn connected_node(&self, node: &str, parameter: &str) -> Option<Connection>;

    /// Invalidate the resolution state of `node` and everything downstream of it
    fn unresolve_future_nodes(&mut self, node: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_parameters() {
        assert!(Parameter::control("exec_in").is_control());
        assert!(!Parameter::new("prompt", PortDataType::String).is_control());
    }

    #[test]
    fn test_resolution_state_default() {
        assert_eq!(ResolutionState::default(), ResolutionState::Unresolved);
    }
}
