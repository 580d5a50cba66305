//! Per-node run state inside an execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::status::NodeStatus;
use crate::transition::validate_node_transition;
use crate::variables::VariableSet;

/// The run state of a single node within an execution.
///
/// Timestamps are taken from the events that drive the transitions, so a
/// rebuilt aggregate carries the same values as the live one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunState {
    /// Current status.
    pub status: NodeStatus,
    /// When the node entered Running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the node settled.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of retries performed (0 on a clean first-attempt success).
    pub retry_count: u32,
    /// Error message if the node failed.
    #[serde(default)]
    pub error_message: Option<String>,
    /// The node's output set (populated on completion).
    #[serde(default)]
    pub output: VariableSet,
    /// Node-local variables.
    #[serde(default)]
    pub locals: VariableSet,
}

impl NodeRunState {
    /// A fresh Pending state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: NodeStatus::Pending,
            started_at: None,
            finished_at: None,
            retry_count: 0,
            error_message: None,
            output: VariableSet::new(),
            locals: VariableSet::new(),
        }
    }

    /// Transition to a new status at the given event time, validating the
    /// transition.
    pub fn transition_to(
        &mut self,
        status: NodeStatus,
        at: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        validate_node_transition(self.status, status)?;
        self.status = status;

        if status == NodeStatus::Running && self.started_at.is_none() {
            self.started_at = Some(at);
        }
        if status.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }
}

impl Default for NodeRunState {
    fn default() -> Self {
        Self::new()
    }
}
