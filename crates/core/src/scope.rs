//! Variable visibility scopes.

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// The visibility of a variable during workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// Workflow-wide, read-only after the execution starts.
    Global,
    /// Execution-wide, writable while the execution is running.
    Execution,
    /// Local to a single node.
    Node(NodeId),
}

impl VariableScope {
    /// Returns `true` if this is the read-only global scope.
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// The node this scope is local to, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Global | Self::Execution => None,
        }
    }
}

impl std::fmt::Display for VariableScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Execution => write!(f, "execution"),
            Self::Node(id) => write!(f, "node:{id}"),
        }
    }
}
