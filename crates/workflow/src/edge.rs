//! Edge definitions: kinds, join strategies, and edge configuration.

use mbflow_core::{EdgeId, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of an edge, governing how the scheduler treats it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Unconditional data/control flow.
    Direct,
    /// Activated only when the configured condition evaluates true.
    Conditional,
    /// Splits one thread of control into parallel branches.
    Fork,
    /// Re-synchronizes parallel branches; the target's release is governed
    /// by its join strategy.
    Join,
    /// Re-admits the target for another iteration, bounded by
    /// `max_iterations`. Ignored for topological ordering.
    Loop,
}

impl EdgeKind {
    /// Returns `true` if this edge participates in topological ordering.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Loop)
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Conditional => write!(f, "conditional"),
            Self::Fork => write!(f, "fork"),
            Self::Join => write!(f, "join"),
            Self::Loop => write!(f, "loop"),
        }
    }
}

/// How a join target decides it has seen enough of its fan-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Release when every incoming join edge is settled and at least one
    /// branch completed.
    #[default]
    WaitAll,
    /// Release on the first completed branch.
    WaitAny,
    /// Alias of [`JoinStrategy::WaitAny`] kept for trigger-style wiring.
    WaitFirst,
    /// Release when at least `n` branches completed.
    WaitN(u32),
}

impl JoinStrategy {
    /// The minimum number of completed branches this strategy needs.
    ///
    /// `WaitAll` additionally requires every branch to be settled before
    /// releasing; this helper only reports the completion floor used for
    /// unsatisfiability checks.
    #[must_use]
    pub fn min_completed(&self) -> usize {
        match self {
            Self::WaitAll | Self::WaitAny | Self::WaitFirst => 1,
            Self::WaitN(n) => *n as usize,
        }
    }
}

/// Configuration carried by an edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Condition expression (conditional edges).
    #[serde(default)]
    pub condition: Option<String>,
    /// Join strategy declared for the target (join edges).
    #[serde(default)]
    pub join_strategy: Option<JoinStrategy>,
    /// Additional ancestor nodes whose outputs are merged into the target's
    /// input scope under a `"<name>_"` prefix.
    #[serde(default)]
    pub include_outputs_from: Vec<NodeId>,
    /// Iteration bound (loop edges).
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Free-form user extension bag.
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

impl EdgeConfig {
    /// An empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the condition expression.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set the join strategy.
    #[must_use]
    pub fn with_join_strategy(mut self, strategy: JoinStrategy) -> Self {
        self.join_strategy = Some(strategy);
        self
    }

    /// Add ancestor outputs to merge into the target's scope.
    #[must_use]
    pub fn include_outputs_from(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.include_outputs_from.extend(nodes);
        self
    }

    /// Set the loop iteration bound.
    #[must_use]
    pub fn with_max_iterations(mut self, bound: u32) -> Self {
        self.max_iterations = Some(bound);
        self
    }
}

/// An edge in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Unique identifier.
    pub id: EdgeId,
    /// Source node.
    pub source: NodeId,
    /// Target node.
    pub target: NodeId,
    /// Edge kind.
    pub kind: EdgeKind,
    /// Edge configuration.
    #[serde(default)]
    pub config: EdgeConfig,
}

impl EdgeDefinition {
    /// Create a direct edge.
    #[must_use]
    pub fn new(id: EdgeId, source: NodeId, target: NodeId) -> Self {
        Self {
            id,
            source,
            target,
            kind: EdgeKind::Direct,
            config: EdgeConfig::default(),
        }
    }

    /// Create an edge of the given kind.
    #[must_use]
    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach a configuration.
    #[must_use]
    pub fn with_config(mut self, config: EdgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns `true` if this edge counts toward topological ordering.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        self.kind.is_structural()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_edges_are_not_structural() {
        assert!(EdgeKind::Direct.is_structural());
        assert!(EdgeKind::Conditional.is_structural());
        assert!(EdgeKind::Fork.is_structural());
        assert!(EdgeKind::Join.is_structural());
        assert!(!EdgeKind::Loop.is_structural());
    }

    #[test]
    fn join_strategy_completion_floor() {
        assert_eq!(JoinStrategy::WaitAll.min_completed(), 1);
        assert_eq!(JoinStrategy::WaitAny.min_completed(), 1);
        assert_eq!(JoinStrategy::WaitFirst.min_completed(), 1);
        assert_eq!(JoinStrategy::WaitN(2).min_completed(), 2);
    }

    #[test]
    fn edge_config_builder() {
        let extra = NodeId::v4();
        let config = EdgeConfig::new()
            .with_condition("score >= 80")
            .with_join_strategy(JoinStrategy::WaitN(2))
            .include_outputs_from([extra])
            .with_max_iterations(5);

        assert_eq!(config.condition.as_deref(), Some("score >= 80"));
        assert_eq!(config.join_strategy, Some(JoinStrategy::WaitN(2)));
        assert_eq!(config.include_outputs_from, vec![extra]);
        assert_eq!(config.max_iterations, Some(5));
    }

    #[test]
    fn edge_kind_display() {
        assert_eq!(EdgeKind::Direct.to_string(), "direct");
        assert_eq!(EdgeKind::Conditional.to_string(), "conditional");
        assert_eq!(EdgeKind::Fork.to_string(), "fork");
        assert_eq!(EdgeKind::Join.to_string(), "join");
        assert_eq!(EdgeKind::Loop.to_string(), "loop");
    }

    #[test]
    fn edge_definition_serde_roundtrip() {
        let edge = EdgeDefinition::new(EdgeId::v4(), NodeId::v4(), NodeId::v4())
            .with_kind(EdgeKind::Join)
            .with_config(EdgeConfig::new().with_join_strategy(JoinStrategy::WaitAll));
        let json = serde_json::to_string(&edge).unwrap();
        let back: EdgeDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, edge.id);
        assert_eq!(back.kind, EdgeKind::Join);
        assert_eq!(back.config.join_strategy, Some(JoinStrategy::WaitAll));
    }
}
