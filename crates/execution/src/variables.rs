//! Scoped variable storage for executions.

use std::collections::HashMap;

use indexmap::IndexMap;
use mbflow_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;

/// An insertion-ordered map of named values with a read-only flag.
///
/// Iteration order is the order keys were first inserted, which keeps
/// bindings and merged outputs deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    values: IndexMap<String, Value>,
    #[serde(default)]
    read_only: bool,
}

impl VariableSet {
    /// Create an empty, writable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from a JSON object map.
    #[must_use]
    pub fn from_map(map: serde_json::Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
            read_only: false,
        }
    }

    /// Insert a value, failing if the set is frozen.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), ExecutionError> {
        let key = key.into();
        if self.read_only {
            return Err(ExecutionError::ReadOnlyVariable { key });
        }
        self.values.insert(key, value);
        Ok(())
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the set has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Mark the set read-only. Irreversible.
    pub fn freeze(&mut self) {
        self.read_only = true;
    }

    /// Returns `true` if the set is frozen.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Copy all entries from `other` into this set.
    pub fn merge_from(&mut self, other: &VariableSet) -> Result<(), ExecutionError> {
        for (key, value) in other.iter() {
            self.insert(key.clone(), value.clone())?;
        }
        Ok(())
    }

    /// Render as a JSON object map (insertion order preserved).
    #[must_use]
    pub fn to_json_map(&self) -> serde_json::Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl FromIterator<(String, Value)> for VariableSet {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
            read_only: false,
        }
    }
}

/// The three-view variable store owned by an execution.
///
/// 1. The *global context*, frozen when the execution starts.
/// 2. Writable *execution variables*.
/// 3. *Per-node outputs*, written once per node completion.
///
/// Flattened lookups consult execution variables first, then the global
/// context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableStore {
    global: VariableSet,
    execution: VariableSet,
    node_outputs: HashMap<NodeId, VariableSet>,
    node_locals: HashMap<NodeId, VariableSet>,
}

impl VariableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed and freeze the global context. Called exactly once, while the
    /// `ExecutionStarted` event is applied.
    pub fn seed_global(&mut self, variables: serde_json::Map<String, Value>) {
        self.global = VariableSet::from_map(variables);
        self.global.freeze();
    }

    /// The read-only global context.
    #[must_use]
    pub fn global(&self) -> &VariableSet {
        &self.global
    }

    /// The writable execution-scoped variables.
    #[must_use]
    pub fn execution(&self) -> &VariableSet {
        &self.execution
    }

    /// Write an execution-scoped variable.
    pub fn set_execution_var(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), ExecutionError> {
        self.execution.insert(key, value)
    }

    /// Write a node-local variable.
    pub fn set_node_local(
        &mut self,
        node: NodeId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), ExecutionError> {
        self.node_locals.entry(node).or_default().insert(key, value)
    }

    /// Node-local variables for `node`, if any were written.
    #[must_use]
    pub fn node_locals(&self, node: NodeId) -> Option<&VariableSet> {
        self.node_locals.get(&node)
    }

    /// Record a node's output set. Re-recording replaces the previous
    /// iteration's output (loop edges re-run nodes).
    pub fn set_node_output(&mut self, node: NodeId, output: VariableSet) {
        self.node_outputs.insert(node, output);
    }

    /// A node's output set, if it completed.
    #[must_use]
    pub fn node_output(&self, node: NodeId) -> Option<&VariableSet> {
        self.node_outputs.get(&node)
    }

    /// All recorded node outputs.
    #[must_use]
    pub fn node_outputs(&self) -> &HashMap<NodeId, VariableSet> {
        &self.node_outputs
    }

    /// Flattened lookup: execution variables shadow the global context.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.execution.get(key).or_else(|| self.global.get(key))
    }

    /// The flattened union view as a JSON map (global first, then
    /// execution overrides).
    #[must_use]
    pub fn flattened(&self) -> serde_json::Map<String, Value> {
        let mut map = self.global.to_json_map();
        for (k, v) in self.execution.iter() {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}
