//! The workflow definition aggregate.

use chrono::{DateTime, Utc};
use mbflow_core::{EdgeId, NodeId, WorkflowId};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edge::EdgeDefinition;
use crate::error::WorkflowError;
use crate::node::NodeDefinition;
use crate::trigger::TriggerDefinition;

/// A complete workflow definition: the graph of nodes and edges the engine
/// compiles and executes.
///
/// Definitions are immutable once compiled. The aggregate invariants
/// (unique node names, resolvable edge endpoints, at least one node, no
/// duplicate edges) are enforced by [`WorkflowBuilder`](crate::WorkflowBuilder)
/// and re-checked by [`Workflow::validate`] for hand-assembled values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Definition version.
    pub version: Version,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form spec metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Nodes, in the order they were added.
    pub nodes: Vec<NodeDefinition>,
    /// Edges, in the order they were added.
    pub edges: Vec<EdgeDefinition>,
    /// Triggers.
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
    /// When the definition was created.
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Look up a node by ID.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up a node by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Look up an edge by ID.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&EdgeDefinition> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// All edges targeting `node`.
    #[must_use]
    pub fn edges_into(&self, node: NodeId) -> Vec<&EdgeDefinition> {
        self.edges.iter().filter(|e| e.target == node).collect()
    }

    /// All edges leaving `node`.
    #[must_use]
    pub fn edges_out_of(&self, node: NodeId) -> Vec<&EdgeDefinition> {
        self.edges.iter().filter(|e| e.source == node).collect()
    }

    /// Re-check the aggregate invariants on a hand-assembled definition.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::Empty);
        }

        let mut names = std::collections::HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(WorkflowError::DuplicateNodeName(node.name.clone()));
            }
        }

        let ids: std::collections::HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        let mut seen_edges = std::collections::HashSet::new();
        for edge in &self.edges {
            for endpoint in [edge.source, edge.target] {
                if !ids.contains(&endpoint) {
                    return Err(WorkflowError::UnknownEndpoint(endpoint));
                }
            }
            if !seen_edges.insert((edge.source, edge.target, edge.kind)) {
                return Err(WorkflowError::DuplicateEdge {
                    from: edge.source,
                    target: edge.target,
                });
            }
        }

        Ok(())
    }
}
