//! Input binding: assembling one node's input scope from its parents.
//!
//! For a target node the binder merges the outputs of its activated direct
//! parents under the node's collision strategy, exposes edge-declared
//! extra ancestors under a `"<name>_"` prefix, overlays the node's
//! explicit mappings, and (when auto-bind is on) validates the result
//! against the node's input schema.

use std::collections::HashMap;

use mbflow_core::{ExecutionId, NodeId};
use mbflow_execution::{VariableSet, VariableStore};
use mbflow_workflow::{CollisionStrategy, EdgeDefinition, NodeDefinition, Workflow};
use serde_json::Value;
use thiserror::Error;

use crate::executor::NodeExecutionInputs;

/// Errors raised while binding a node's inputs.
#[derive(Debug, Error)]
pub enum BindError {
    /// Two parents supplied the same key under the Error collision
    /// strategy.
    #[error("output key {key:?} collides across parents [{}]", parents.join(", "))]
    CollisionDetected {
        /// The colliding key.
        key: String,
        /// Names of the parents that supplied it.
        parents: Vec<String>,
    },

    /// Auto-bind schema validation failed.
    #[error("input validation failed for node {node_name:?}: {detail}")]
    ValidationFailed {
        /// The target node's name.
        node_name: String,
        /// The schema violation.
        detail: String,
    },

    /// An explicit mapping path could not be parsed or resolved.
    #[error("mapping path {path:?} is not of the form \"parent.field\"")]
    BadMappingPath {
        /// The offending path expression.
        path: String,
    },
}

/// Gathers scoped inputs for node invocations. Stateless; reads the
/// variable store the scheduler hands it.
#[derive(Debug, Default)]
pub struct VariableBinder;

impl VariableBinder {
    /// Bind the inputs for one invocation of `node`.
    ///
    /// `activated_edges` are the incoming structural edges whose condition
    /// held (or that carry none), in workflow edge order.
    pub fn bind(
        workflow: &Workflow,
        node: &NodeDefinition,
        activated_edges: &[&EdgeDefinition],
        store: &VariableStore,
        execution_id: ExecutionId,
    ) -> Result<NodeExecutionInputs, BindError> {
        // 1. Direct parents with an activated edge into the target.
        let mut direct: Vec<NodeId> = Vec::new();
        for edge in activated_edges {
            if !direct.contains(&edge.source) {
                direct.push(edge.source);
            }
        }

        // 2. Edge-declared extra ancestors.
        let mut extra: Vec<NodeId> = Vec::new();
        for edge in activated_edges {
            for id in &edge.config.include_outputs_from {
                if !extra.contains(id) {
                    extra.push(*id);
                }
            }
        }

        // 3. Raw parent outputs, for introspection.
        let mut parent_outputs: HashMap<NodeId, VariableSet> = HashMap::new();
        for id in &direct {
            if let Some(output) = store.node_output(*id) {
                parent_outputs.insert(*id, output.clone());
            }
        }

        // 4. Merge direct outputs under the collision strategy.
        let mut variables = merge_direct_outputs(workflow, node, &direct, store)?;

        // 5. Extras always appear under the "<name>_" prefix.
        for id in &extra {
            let Some(output) = store.node_output(*id) else {
                continue;
            };
            let prefix = node_name(workflow, *id);
            for (key, value) in output.iter() {
                insert(&mut variables, format!("{prefix}_{key}"), value.clone());
            }
        }

        // 6. Explicit mappings overlay everything merged so far.
        if let Some(binding) = &node.binding {
            for (input_name, path) in &binding.mappings {
                let value = resolve_mapping_path(workflow, store, path)?;
                insert(&mut variables, input_name.clone(), value);
            }
        }

        // 7. Auto-bind schema validation.
        let auto_bind = node.binding.as_ref().is_some_and(|b| b.auto_bind);
        if auto_bind && let Some(schema) = &node.input_schema {
            schema
                .validate(&variables.to_json_map())
                .map_err(|violation| BindError::ValidationFailed {
                    node_name: node.name.clone(),
                    detail: violation.to_string(),
                })?;
        }

        Ok(NodeExecutionInputs {
            execution_id,
            workflow_id: workflow.id,
            node_id: node.id,
            variables,
            global: store.global().clone(),
            parent_outputs,
        })
    }
}

/// Merge the outputs of `direct` parents under the target's collision
/// strategy. Only keys supplied by more than one parent are treated as
/// collisions; unique keys keep their raw name.
fn merge_direct_outputs(
    workflow: &Workflow,
    node: &NodeDefinition,
    direct: &[NodeId],
    store: &VariableStore,
) -> Result<VariableSet, BindError> {
    let strategy = node.collision_strategy();

    // Which parents supply each key, in parent order.
    let mut suppliers: indexmap::IndexMap<String, Vec<NodeId>> = indexmap::IndexMap::new();
    for id in direct {
        if let Some(output) = store.node_output(*id) {
            for (key, _) in output.iter() {
                suppliers.entry(key.clone()).or_default().push(*id);
            }
        }
    }

    let mut merged = VariableSet::new();
    for (key, parents) in &suppliers {
        if parents.len() == 1 {
            let value = store
                .node_output(parents[0])
                .and_then(|o| o.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            insert(&mut merged, key.clone(), value);
            continue;
        }

        match strategy {
            CollisionStrategy::NamespaceByParent => {
                // The raw key is omitted; each parent's value appears as
                // "<parent-name>_<key>".
                for id in parents {
                    let value = store
                        .node_output(*id)
                        .and_then(|o| o.get(key))
                        .cloned()
                        .unwrap_or(Value::Null);
                    insert(&mut merged, format!("{}_{key}", node_name(workflow, *id)), value);
                }
            }
            CollisionStrategy::Collect => {
                let values: Vec<Value> = parents
                    .iter()
                    .map(|id| {
                        store
                            .node_output(*id)
                            .and_then(|o| o.get(key))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                insert(&mut merged, key.clone(), Value::Array(values));
            }
            CollisionStrategy::Error => {
                return Err(BindError::CollisionDetected {
                    key: key.clone(),
                    parents: parents.iter().map(|id| node_name(workflow, *id)).collect(),
                });
            }
        }
    }

    Ok(merged)
}

/// Resolve a `"parent.field"` path against a parent's recorded output.
/// A resolvable parent with a missing field yields `null`.
fn resolve_mapping_path(
    workflow: &Workflow,
    store: &VariableStore,
    path: &str,
) -> Result<Value, BindError> {
    let Some((parent_name, field)) = path.split_once('.') else {
        return Err(BindError::BadMappingPath {
            path: path.to_string(),
        });
    };
    if parent_name.is_empty() || field.is_empty() {
        return Err(BindError::BadMappingPath {
            path: path.to_string(),
        });
    }
    let Some(parent) = workflow.node_by_name(parent_name) else {
        return Err(BindError::BadMappingPath {
            path: path.to_string(),
        });
    };
    Ok(store
        .node_output(parent.id)
        .and_then(|o| o.get(field))
        .cloned()
        .unwrap_or(Value::Null))
}

fn node_name(workflow: &Workflow, id: NodeId) -> String {
    workflow
        .node(id)
        .map_or_else(|| id.to_string(), |n| n.name.clone())
}

/// The binder's sets are never frozen; insert cannot fail.
fn insert(set: &mut VariableSet, key: String, value: Value) {
    let _ = set.insert(key, value);
}
