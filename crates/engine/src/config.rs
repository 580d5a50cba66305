//! Engine configuration.

use std::time::Duration;

use mbflow_resilience::{BreakerConfig, RetryPolicy};
use mbflow_workflow::NodeDefinition;

use crate::strategy::ErrorStrategy;

/// Default cap on concurrently executing nodes.
pub const DEFAULT_MAX_PARALLEL_NODES: usize = 10;

/// Tunables for a [`WorkflowEngine`](crate::WorkflowEngine) instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on concurrent node executions.
    pub max_parallel_nodes: usize,
    /// Default per-node execution timeout. Nodes may override it via
    /// `config["timeout_ms"]`.
    pub default_node_timeout: Option<Duration>,
    /// Overall execution deadline; elapsing behaves as cancellation.
    pub execution_timeout: Option<Duration>,
    /// How long cancellation waits for in-flight nodes before giving up.
    pub cancellation_grace: Duration,
    /// Retry policy applied to retriable executor failures.
    pub retry: RetryPolicy,
    /// Circuit breaker configuration, one breaker per node kind.
    pub breaker: BreakerConfig,
    /// What a node failure means for the execution.
    pub error_strategy: ErrorStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: DEFAULT_MAX_PARALLEL_NODES,
            default_node_timeout: None,
            execution_timeout: None,
            cancellation_grace: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            error_strategy: ErrorStrategy::default(),
        }
    }
}

impl EngineConfig {
    /// The effective execution timeout for `node`: its own
    /// `config["timeout_ms"]` when present, the engine default otherwise.
    #[must_use]
    pub fn node_timeout(&self, node: &NodeDefinition) -> Option<Duration> {
        node.config
            .get("timeout_ms")
            .and_then(serde_json::Value::as_u64)
            .map(Duration::from_millis)
            .or(self.default_node_timeout)
    }
}
