//! Workflow definition and graph validation errors.

use mbflow_core::{EdgeId, NodeId};
use thiserror::Error;

/// Errors raised while building or validating a workflow definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Two nodes in the same workflow share a name.
    #[error("duplicate node name: {0}")]
    DuplicateNodeName(String),

    /// An edge references a node that is not part of the workflow.
    #[error("edge endpoint references unknown node: {0}")]
    UnknownEndpoint(NodeId),

    /// A node was referenced by name but no node carries that name.
    #[error("no node named {0:?}")]
    UnknownNodeName(String),

    /// The workflow contains no nodes.
    #[error("workflow has no nodes")]
    Empty,

    /// The same (source, target, kind) edge was declared twice.
    #[error("duplicate edge from {from} to {target}")]
    DuplicateEdge {
        /// Source endpoint of the duplicated edge.
        from: NodeId,
        /// Target endpoint of the duplicated edge.
        target: NodeId,
    },

    /// A node kind tag failed validation.
    #[error("invalid node kind {0:?}: must be non-empty lowercase [a-z0-9_-]")]
    InvalidNodeKind(String),
}

/// Errors raised while constructing or analysing the dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The non-loop subgraph contains a cycle.
    #[error("cycle detected: {}", format_path(path))]
    CycleDetected {
        /// One offending cycle, listed in traversal order.
        path: Vec<NodeId>,
    },

    /// A node has neither incoming nor outgoing non-loop edges.
    #[error("orphan node {name:?} ({node}): no edges connect it to the graph")]
    OrphanNode {
        /// The orphaned node.
        node: NodeId,
        /// Its human-readable name.
        name: String,
    },

    /// An edge's endpoints are not in the node set.
    #[error("dangling edge {edge}: endpoint {node} not in workflow")]
    DanglingEdge {
        /// The offending edge.
        edge: EdgeId,
        /// The endpoint that could not be resolved.
        node: NodeId,
    },
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_node_name_display() {
        let err = WorkflowError::DuplicateNodeName("fetch".into());
        assert_eq!(err.to_string(), "duplicate node name: fetch");
    }

    #[test]
    fn cycle_display_lists_path() {
        let a = NodeId::nil();
        let err = GraphError::CycleDetected { path: vec![a, a] };
        assert!(err.to_string().contains("cycle detected"));
        assert!(err.to_string().contains("->"));
    }

    #[test]
    fn dangling_edge_display() {
        let err = GraphError::DanglingEdge {
            edge: EdgeId::nil(),
            node: NodeId::nil(),
        };
        assert!(err.to_string().contains("dangling edge"));
    }
}
