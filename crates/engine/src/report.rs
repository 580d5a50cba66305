//! The terminal summary returned by `Execute`.

use std::collections::HashMap;
use std::time::Duration;

use mbflow_core::{ExecutionId, NodeId, WorkflowId};
use mbflow_execution::{Execution, ExecutionPhase, NodeRunState, VariableSet};

/// Everything a caller needs to know about a finished execution.
///
/// The event stream remains the definitive audit log; the report is a
/// convenience projection of the terminal aggregate.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The execution's identity.
    pub execution_id: ExecutionId,
    /// The workflow that ran.
    pub workflow_id: WorkflowId,
    /// Terminal phase.
    pub phase: ExecutionPhase,
    /// Terminal error message, if the execution failed.
    pub error: Option<String>,
    /// Per-node run states.
    pub node_states: HashMap<NodeId, NodeRunState>,
    /// Flattened final variables (global context plus execution scope).
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Number of events in the execution's stream.
    pub event_count: u64,
}

impl ExecutionReport {
    /// Project a report from a terminal aggregate.
    #[must_use]
    pub fn from_execution(execution: &Execution, duration: Duration) -> Self {
        Self {
            execution_id: execution.id(),
            workflow_id: execution.workflow_id(),
            phase: execution.phase(),
            error: execution.error().map(ToString::to_string),
            node_states: execution.node_states().clone(),
            variables: execution.store().flattened(),
            duration,
            event_count: execution.version(),
        }
    }

    /// Returns `true` if the execution completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.phase.is_success()
    }

    /// Returns `true` if the execution ended in failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.phase, ExecutionPhase::Failed | ExecutionPhase::Cancelled)
    }

    /// A node's output set, if it completed.
    #[must_use]
    pub fn node_output(&self, node: NodeId) -> Option<&VariableSet> {
        self.node_states
            .get(&node)
            .filter(|s| s.status == mbflow_execution::NodeStatus::Completed)
            .map(|s| &s.output)
    }

    /// A final variable by name.
    #[must_use]
    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }
}
