//! Maps node kinds to executor implementations.

use std::collections::HashMap;
use std::sync::Arc;

use mbflow_workflow::NodeKind;

use crate::builtin;
use crate::error::EngineError;
use crate::executor::NodeExecutor;

/// Registry of node executors, keyed by kind tag.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ExecutorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in executors
    /// (`start`, `transform`, `router`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Built-in kinds are valid tags; registration cannot collide on a
        // fresh registry.
        let _ = registry.register(NodeKind::start(), Arc::new(builtin::StartExecutor));
        let _ = registry.register(NodeKind::transform(), Arc::new(builtin::TransformExecutor));
        let _ = registry.register(NodeKind::router(), Arc::new(builtin::RouterExecutor));
        registry
    }

    /// Register an executor for a kind.
    pub fn register(
        &mut self,
        kind: NodeKind,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<(), EngineError> {
        if self.executors.contains_key(&kind) {
            return Err(EngineError::ExecutorAlreadyRegistered {
                kind: kind.to_string(),
            });
        }
        self.executors.insert(kind, executor);
        Ok(())
    }

    /// Look up the executor for a kind.
    pub fn get(&self, kind: &NodeKind) -> Result<Arc<dyn NodeExecutor>, EngineError> {
        self.executors
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNodeKind {
                kind: kind.to_string(),
            })
    }

    /// Returns `true` if a kind is registered.
    #[must_use]
    pub fn contains(&self, kind: &NodeKind) -> bool {
        self.executors.contains_key(kind)
    }

    /// All registered kind tags.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.executors.keys().map(ToString::to_string).collect();
        kinds.sort();
        kinds
    }
}
