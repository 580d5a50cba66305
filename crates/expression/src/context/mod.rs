//! Evaluation context for expression execution.
//!
//! The context is a flat, insertion-ordered variable map assembled in
//! layers (global context, execution variables, source-node outputs);
//! later layers shadow earlier ones on key clashes.

use indexmap::IndexMap;
use serde_json::Value;

/// The variables visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    vars: IndexMap<String, Value>,
}

impl EvaluationContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single variable.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Merge a layer of variables; keys shadow existing entries.
    pub fn layer<'a>(&mut self, values: impl IntoIterator<Item = (&'a String, &'a Value)>) {
        for (k, v) in values {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    /// Resolve a variable by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Returns `true` if the context holds `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Number of visible variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if no variables are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for EvaluationContext {
    fn from_iter<T: IntoIterator<Item = (S, Value)>>(iter: T) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.set(k, v);
        }
        ctx
    }
}
