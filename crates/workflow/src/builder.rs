//! Fluent construction of workflow definitions.

use chrono::Utc;
use mbflow_core::{EdgeId, NodeId, WorkflowId};
use semver::Version;
use serde_json::Value;

use crate::definition::Workflow;
use crate::edge::{EdgeConfig, EdgeDefinition, EdgeKind};
use crate::error::WorkflowError;
use crate::node::{NodeDefinition, NodeKind};
use crate::trigger::TriggerDefinition;

/// Incrementally builds a [`Workflow`], enforcing the aggregate invariants
/// as parts are added.
///
/// Node identity is canonically the UUID [`NodeId`]; names are unique and
/// may be used for edge wiring via [`WorkflowBuilder::connect_names`],
/// which resolves them to IDs at build time.
#[derive(Debug)]
pub struct WorkflowBuilder {
    id: WorkflowId,
    name: String,
    version: Version,
    description: Option<String>,
    metadata: serde_json::Map<String, Value>,
    nodes: Vec<NodeDefinition>,
    edges: Vec<EdgeDefinition>,
    triggers: Vec<TriggerDefinition>,
}

impl WorkflowBuilder {
    /// Start a new workflow definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::v4(),
            name: name.into(),
            version: Version::new(0, 1, 0),
            description: None,
            metadata: serde_json::Map::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Set the definition version.
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a node, returning its generated ID.
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        name: impl Into<String>,
    ) -> Result<NodeId, WorkflowError> {
        let node = NodeDefinition::new(NodeId::v4(), kind, name);
        let id = node.id;
        self.add_node_definition(node)?;
        Ok(id)
    }

    /// Add a fully-specified node definition.
    pub fn add_node_definition(&mut self, node: NodeDefinition) -> Result<(), WorkflowError> {
        if self.nodes.iter().any(|n| n.name == node.name) {
            return Err(WorkflowError::DuplicateNodeName(node.name));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Connect two nodes with a direct edge.
    pub fn connect(&mut self, source: NodeId, target: NodeId) -> Result<EdgeId, WorkflowError> {
        self.connect_with(source, target, EdgeKind::Direct, EdgeConfig::default())
    }

    /// Connect two nodes with an edge of the given kind and configuration.
    pub fn connect_with(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        config: EdgeConfig,
    ) -> Result<EdgeId, WorkflowError> {
        for endpoint in [source, target] {
            if !self.nodes.iter().any(|n| n.id == endpoint) {
                return Err(WorkflowError::UnknownEndpoint(endpoint));
            }
        }
        if self
            .edges
            .iter()
            .any(|e| e.source == source && e.target == target && e.kind == kind)
        {
            return Err(WorkflowError::DuplicateEdge { from: source, target });
        }

        let edge = EdgeDefinition::new(EdgeId::v4(), source, target)
            .with_kind(kind)
            .with_config(config);
        let id = edge.id;
        self.edges.push(edge);
        Ok(id)
    }

    /// Connect two nodes by name (resolved against already-added nodes).
    pub fn connect_names(&mut self, source: &str, target: &str) -> Result<EdgeId, WorkflowError> {
        let source = self.node_id(source)?;
        let target = self.node_id(target)?;
        self.connect(source, target)
    }

    /// Resolve a node name to its ID.
    pub fn node_id(&self, name: &str) -> Result<NodeId, WorkflowError> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.id)
            .ok_or_else(|| WorkflowError::UnknownNodeName(name.to_string()))
    }

    /// Attach a trigger.
    pub fn add_trigger(&mut self, trigger: TriggerDefinition) {
        self.triggers.push(trigger);
    }

    /// Finalize the definition.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let workflow = Workflow {
            id: self.id,
            name: self.name,
            version: self.version,
            description: self.description,
            metadata: self.metadata,
            nodes: self.nodes,
            edges: self.edges,
            triggers: self.triggers,
            created_at: Utc::now(),
        };
        workflow.validate()?;
        Ok(workflow)
    }
}
