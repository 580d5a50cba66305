//! Immutable execution events.

use chrono::{DateTime, Utc};
use mbflow_core::{EventId, ExecutionId, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The lifecycle tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The execution left Planning and entered Executing.
    ExecutionStarted,
    /// A node began running.
    NodeStarted,
    /// A node finished successfully.
    NodeCompleted,
    /// A node failed terminally (after retries).
    NodeFailed,
    /// A node was skipped without running.
    NodeSkipped,
    /// A node attempt failed and another attempt is scheduled.
    NodeRetrying,
    /// An execution-scoped variable was written.
    VariableSet,
    /// The execution finished successfully.
    ExecutionCompleted,
    /// The execution finished with a failure.
    ExecutionFailed,
    /// A circuit breaker opened for a node kind.
    CircuitOpened,
    /// A circuit breaker closed for a node kind.
    CircuitClosed,
    /// An edge condition failed to evaluate and was treated as false.
    ConditionWarning,
}

impl EventType {
    /// Returns `true` for events that describe a single node.
    #[must_use]
    pub fn is_node_event(&self) -> bool {
        matches!(
            self,
            Self::NodeStarted
                | Self::NodeCompleted
                | Self::NodeFailed
                | Self::NodeSkipped
                | Self::NodeRetrying
        )
    }

    /// Returns `true` for events that end the execution.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ExecutionCompleted | Self::ExecutionFailed)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ExecutionStarted => "execution_started",
            Self::NodeStarted => "node_started",
            Self::NodeCompleted => "node_completed",
            Self::NodeFailed => "node_failed",
            Self::NodeSkipped => "node_skipped",
            Self::NodeRetrying => "node_retrying",
            Self::VariableSet => "variable_set",
            Self::ExecutionCompleted => "execution_completed",
            Self::ExecutionFailed => "execution_failed",
            Self::CircuitOpened => "circuit_opened",
            Self::CircuitClosed => "circuit_closed",
            Self::ConditionWarning => "condition_warning",
        };
        f.write_str(s)
    }
}

/// One immutable entry in an execution's event stream.
///
/// The event sequence for a single execution is a total order: sequence
/// numbers are contiguous from 1 and assigned under the aggregate's
/// exclusive lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier.
    pub id: EventId,
    /// Lifecycle tag.
    pub event_type: EventType,
    /// The execution (aggregate) this event belongs to.
    pub execution_id: ExecutionId,
    /// Position in the execution's total order, starting at 1.
    pub sequence: u64,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The node this event describes, if any.
    #[serde(default)]
    pub node_id: Option<NodeId>,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    /// Optional transport/adapter metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

impl Event {
    /// Create an event with a fresh identity and the current timestamp.
    #[must_use]
    pub fn new(
        event_type: EventType,
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        sequence: u64,
    ) -> Self {
        Self {
            id: EventId::v4(),
            event_type,
            execution_id,
            sequence,
            timestamp: Utc::now(),
            workflow_id,
            node_id: None,
            data: serde_json::Map::new(),
            metadata: None,
        }
    }

    /// Attach the node this event describes.
    #[must_use]
    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Add a payload entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Replace the payload map.
    #[must_use]
    pub fn with_payload(mut self, data: serde_json::Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// A payload entry, if present.
    #[must_use]
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}
