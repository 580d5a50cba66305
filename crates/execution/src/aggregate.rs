//! The event-sourced execution aggregate.
//!
//! All derived state is produced by applying events: every command
//! validates its preconditions, constructs an event with the next sequence
//! number, applies it, and pushes it onto the uncommitted buffer. Replaying
//! the same events through [`Execution::rebuild`] yields identical state
//! (timestamps are carried by the events).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mbflow_core::{EdgeId, ExecutionId, NodeId, TriggerId, VariableScope, WorkflowId};
use mbflow_events::{Event, EventType};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ExecutionError;
use crate::node_state::NodeRunState;
use crate::status::{ExecutionPhase, NodeStatus};
use crate::transition::can_transition_phase;
use crate::variables::{VariableSet, VariableStore};

/// An execution aggregate shared across scheduler tasks.
///
/// Commands take the write lock, reads take the read lock; the lock is
/// never held across an await point.
pub type SharedExecution = Arc<RwLock<Execution>>;

/// A single workflow execution, driven by commands and derived from
/// events.
#[derive(Debug, Clone)]
pub struct Execution {
    id: ExecutionId,
    workflow_id: WorkflowId,
    trigger_id: Option<TriggerId>,
    phase: ExecutionPhase,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    store: VariableStore,
    node_states: HashMap<NodeId, NodeRunState>,
    uncommitted: Vec<Event>,
    version: u64,
}

/// Equality over derived state only: the uncommitted buffer is a
/// persistence staging area, not state, and is excluded so a rebuilt
/// aggregate compares equal to the live one.
impl PartialEq for Execution {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.workflow_id == other.workflow_id
            && self.trigger_id == other.trigger_id
            && self.phase == other.phase
            && self.started_at == other.started_at
            && self.finished_at == other.finished_at
            && self.error == other.error
            && self.store == other.store
            && self.node_states == other.node_states
            && self.version == other.version
    }
}

impl Execution {
    /// Create a fresh aggregate in the Planning phase.
    #[must_use]
    pub fn new(id: ExecutionId, workflow_id: WorkflowId) -> Self {
        Self {
            id,
            workflow_id,
            trigger_id: None,
            phase: ExecutionPhase::Planning,
            started_at: None,
            finished_at: None,
            error: None,
            store: VariableStore::new(),
            node_states: HashMap::new(),
            uncommitted: Vec::new(),
            version: 0,
        }
    }

    /// Wrap the aggregate for shared use.
    #[must_use]
    pub fn into_shared(self) -> SharedExecution {
        Arc::new(RwLock::new(self))
    }

    /// Rebuild an aggregate by replaying trusted historical events.
    ///
    /// Command validation is bypassed; the event stream is the source of
    /// truth.
    pub fn rebuild(
        id: ExecutionId,
        workflow_id: WorkflowId,
        events: &[Event],
    ) -> Result<Self, ExecutionError> {
        let mut execution = Self::new(id, workflow_id);
        for event in events {
            execution.apply(event)?;
        }
        Ok(execution)
    }

    // ── accessors ──────────────────────────────────────────────────────

    /// The execution's identity.
    #[must_use]
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// The workflow being executed.
    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// The trigger that started this execution, once started.
    #[must_use]
    pub fn trigger_id(&self) -> Option<TriggerId> {
        self.trigger_id
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// Last applied sequence number (0 before any event).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Terminal error message, if the execution failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// When the execution started.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the execution reached a terminal phase.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// The variable store.
    #[must_use]
    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// A node's run state, if any event touched it.
    #[must_use]
    pub fn node_state(&self, node: NodeId) -> Option<&NodeRunState> {
        self.node_states.get(&node)
    }

    /// All node states touched so far.
    #[must_use]
    pub fn node_states(&self) -> &HashMap<NodeId, NodeRunState> {
        &self.node_states
    }

    /// A node's status; nodes never touched by an event are Pending.
    #[must_use]
    pub fn node_status(&self, node: NodeId) -> NodeStatus {
        self.node_states
            .get(&node)
            .map_or(NodeStatus::Pending, |s| s.status)
    }

    /// Events produced but not yet persisted.
    #[must_use]
    pub fn uncommitted(&self) -> &[Event] {
        &self.uncommitted
    }

    /// Drain the uncommitted buffer for persistence.
    pub fn take_uncommitted(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.uncommitted)
    }

    // ── commands ───────────────────────────────────────────────────────

    /// Start the execution, seeding and freezing the global context.
    pub fn start(
        &mut self,
        trigger_id: TriggerId,
        initial_variables: serde_json::Map<String, Value>,
    ) -> Result<Event, ExecutionError> {
        if self.phase != ExecutionPhase::Planning {
            return Err(ExecutionError::invalid_state(
                "start",
                "phase planning",
                self.phase,
            ));
        }
        let event = self
            .next_event(EventType::ExecutionStarted)
            .with_data("trigger_id", Value::String(trigger_id.to_string()))
            .with_data("variables", Value::Object(initial_variables));
        self.record(event)
    }

    /// Mark a node as running. A node in a terminal status is re-admitted
    /// with a fresh state (loop iterations).
    pub fn start_node(
        &mut self,
        node: NodeId,
        name: &str,
        kind: &str,
        inputs: serde_json::Map<String, Value>,
    ) -> Result<Event, ExecutionError> {
        self.require_phase("start_node", ExecutionPhase::Executing)?;
        if self.node_status(node) == NodeStatus::Running {
            return Err(ExecutionError::invalid_node_transition(
                NodeStatus::Running,
                NodeStatus::Running,
            ));
        }
        let event = self
            .next_event(EventType::NodeStarted)
            .with_node(node)
            .with_data("node_name", Value::String(name.to_string()))
            .with_data("node_kind", Value::String(kind.to_string()))
            .with_data("inputs", Value::Object(inputs));
        self.record(event)
    }

    /// Record a retry attempt for a running node.
    pub fn retry_node(
        &mut self,
        node: NodeId,
        name: &str,
        attempt: u32,
        delay: Duration,
    ) -> Result<Event, ExecutionError> {
        self.require_phase("retry_node", ExecutionPhase::Executing)?;
        self.require_node_status("retry_node", node, NodeStatus::Running)?;
        let event = self
            .next_event(EventType::NodeRetrying)
            .with_node(node)
            .with_data("node_name", Value::String(name.to_string()))
            .with_data("attempt", Value::from(attempt))
            .with_data("delay_ms", Value::from(delay.as_millis() as u64));
        self.record(event)
    }

    /// Mark a node as completed with its output.
    pub fn complete_node(
        &mut self,
        node: NodeId,
        name: &str,
        kind: &str,
        output: serde_json::Map<String, Value>,
        duration: Duration,
        retry_count: u32,
    ) -> Result<Event, ExecutionError> {
        self.require_phase("complete_node", ExecutionPhase::Executing)?;
        self.require_node_status("complete_node", node, NodeStatus::Running)?;
        let event = self
            .next_event(EventType::NodeCompleted)
            .with_node(node)
            .with_data("node_name", Value::String(name.to_string()))
            .with_data("node_kind", Value::String(kind.to_string()))
            .with_data("output", Value::Object(output))
            .with_data("duration_ms", Value::from(duration.as_millis() as u64))
            .with_data("retry_count", Value::from(retry_count));
        self.record(event)
    }

    /// Mark a node as failed.
    pub fn fail_node(
        &mut self,
        node: NodeId,
        name: &str,
        kind: &str,
        error: &str,
        retry_count: u32,
    ) -> Result<Event, ExecutionError> {
        self.require_phase("fail_node", ExecutionPhase::Executing)?;
        self.require_node_status("fail_node", node, NodeStatus::Running)?;
        let event = self
            .next_event(EventType::NodeFailed)
            .with_node(node)
            .with_data("node_name", Value::String(name.to_string()))
            .with_data("node_kind", Value::String(kind.to_string()))
            .with_data("error", Value::String(error.to_string()))
            .with_data("retry_count", Value::from(retry_count));
        self.record(event)
    }

    /// Skip a node that has not started.
    pub fn skip_node(
        &mut self,
        node: NodeId,
        name: &str,
        reason: &str,
    ) -> Result<Event, ExecutionError> {
        self.require_phase("skip_node", ExecutionPhase::Executing)?;
        self.require_node_status("skip_node", node, NodeStatus::Pending)?;
        let event = self
            .next_event(EventType::NodeSkipped)
            .with_node(node)
            .with_data("node_name", Value::String(name.to_string()))
            .with_data("reason", Value::String(reason.to_string()));
        self.record(event)
    }

    /// Write a variable in the given scope.
    pub fn set_variable(
        &mut self,
        key: &str,
        value: Value,
        scope: VariableScope,
    ) -> Result<Event, ExecutionError> {
        self.require_phase("set_variable", ExecutionPhase::Executing)?;
        if scope.is_global() {
            return Err(ExecutionError::ReadOnlyVariable {
                key: key.to_string(),
            });
        }
        let mut event = self
            .next_event(EventType::VariableSet)
            .with_data("key", Value::String(key.to_string()))
            .with_data("value", value)
            .with_data(
                "scope",
                serde_json::to_value(scope).unwrap_or(Value::Null),
            );
        if let Some(node) = scope.node_id() {
            event = event.with_node(node);
        }
        self.record(event)
    }

    /// Complete the execution with the union of final variables.
    pub fn complete(
        &mut self,
        final_variables: serde_json::Map<String, Value>,
    ) -> Result<Event, ExecutionError> {
        self.require_transition("complete", ExecutionPhase::Completed)?;
        let event = self
            .next_event(EventType::ExecutionCompleted)
            .with_data("variables", Value::Object(final_variables));
        self.record(event)
    }

    /// Fail the execution.
    pub fn fail(
        &mut self,
        error: &str,
        failed_node: Option<NodeId>,
    ) -> Result<Event, ExecutionError> {
        self.require_transition("fail", ExecutionPhase::Failed)?;
        let mut event = self
            .next_event(EventType::ExecutionFailed)
            .with_data("error", Value::String(error.to_string()));
        if let Some(node) = failed_node {
            event = event
                .with_node(node)
                .with_data("failed_node_id", Value::String(node.to_string()));
        }
        self.record(event)
    }

    /// Record a circuit breaker opening for a node kind (audit only).
    pub fn note_circuit_opened(&mut self, node_kind: &str) -> Result<Event, ExecutionError> {
        self.require_phase("note_circuit_opened", ExecutionPhase::Executing)?;
        let event = self
            .next_event(EventType::CircuitOpened)
            .with_data("node_kind", Value::String(node_kind.to_string()));
        self.record(event)
    }

    /// Record a circuit breaker closing for a node kind (audit only).
    pub fn note_circuit_closed(&mut self, node_kind: &str) -> Result<Event, ExecutionError> {
        self.require_phase("note_circuit_closed", ExecutionPhase::Executing)?;
        let event = self
            .next_event(EventType::CircuitClosed)
            .with_data("node_kind", Value::String(node_kind.to_string()));
        self.record(event)
    }

    /// Record an edge condition that failed to evaluate and was downgraded
    /// to false (audit only).
    pub fn warn_condition(&mut self, edge: EdgeId, message: &str) -> Result<Event, ExecutionError> {
        self.require_phase("warn_condition", ExecutionPhase::Executing)?;
        let event = self
            .next_event(EventType::ConditionWarning)
            .with_data("edge_id", Value::String(edge.to_string()))
            .with_data("message", Value::String(message.to_string()));
        self.record(event)
    }

    // ── internals ──────────────────────────────────────────────────────

    fn next_event(&self, event_type: EventType) -> Event {
        Event::new(event_type, self.id, self.workflow_id, self.version + 1)
    }

    fn record(&mut self, event: Event) -> Result<Event, ExecutionError> {
        self.apply(&event)?;
        self.uncommitted.push(event.clone());
        Ok(event)
    }

    fn require_phase(
        &self,
        command: &'static str,
        phase: ExecutionPhase,
    ) -> Result<(), ExecutionError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(ExecutionError::invalid_state(
                command,
                format!("phase {phase}"),
                self.phase,
            ))
        }
    }

    fn require_transition(
        &self,
        command: &'static str,
        to: ExecutionPhase,
    ) -> Result<(), ExecutionError> {
        if can_transition_phase(self.phase, to) {
            Ok(())
        } else {
            Err(ExecutionError::invalid_state(
                command,
                format!("a phase that may transition to {to}"),
                self.phase,
            ))
        }
    }

    fn require_node_status(
        &self,
        command: &'static str,
        node: NodeId,
        status: NodeStatus,
    ) -> Result<(), ExecutionError> {
        let actual = self.node_status(node);
        if actual == status {
            Ok(())
        } else {
            Err(ExecutionError::invalid_state(
                command,
                format!("node {node} in status {status}"),
                actual,
            ))
        }
    }

    /// Apply an event to derived state. Trusted: no command validation,
    /// timestamps and counters come from the event itself.
    fn apply(&mut self, event: &Event) -> Result<(), ExecutionError> {
        let ts = event.timestamp;
        match event.event_type {
            EventType::ExecutionStarted => {
                self.phase = ExecutionPhase::Executing;
                self.started_at = Some(ts);
                self.trigger_id = event
                    .data_field("trigger_id")
                    .and_then(Value::as_str)
                    .and_then(|s| TriggerId::parse(s).ok());
                self.store.seed_global(object_field(event, "variables"));
            }
            EventType::NodeStarted => {
                if let Some(node) = event.node_id {
                    let state = self.node_states.entry(node).or_default();
                    // Loop re-admission: a settled node restarts with a
                    // fresh pipeline.
                    if state.status.is_terminal() {
                        *state = NodeRunState::new();
                    }
                    state.status = NodeStatus::Running;
                    if state.started_at.is_none() {
                        state.started_at = Some(ts);
                    }
                }
            }
            EventType::NodeRetrying => {
                if let Some(node) = event.node_id {
                    self.node_states.entry(node).or_default().retry_count += 1;
                }
            }
            EventType::NodeCompleted => {
                if let Some(node) = event.node_id {
                    let output = VariableSet::from_map(object_field(event, "output"));
                    let state = self.node_states.entry(node).or_default();
                    state.status = NodeStatus::Completed;
                    state.finished_at = Some(ts);
                    state.retry_count = u32_field(event, "retry_count");
                    state.output = output.clone();
                    self.store.set_node_output(node, output);
                }
            }
            EventType::NodeFailed => {
                if let Some(node) = event.node_id {
                    let state = self.node_states.entry(node).or_default();
                    state.status = NodeStatus::Failed;
                    state.finished_at = Some(ts);
                    state.retry_count = u32_field(event, "retry_count");
                    state.error_message = event
                        .data_field("error")
                        .and_then(Value::as_str)
                        .map(ToString::to_string);
                }
            }
            EventType::NodeSkipped => {
                if let Some(node) = event.node_id {
                    let state = self.node_states.entry(node).or_default();
                    state.status = NodeStatus::Skipped;
                    state.finished_at = Some(ts);
                }
            }
            EventType::VariableSet => {
                let key = event
                    .data_field("key")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let value = event.data_field("value").cloned().unwrap_or(Value::Null);
                let scope: VariableScope = event
                    .data_field("scope")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or(VariableScope::Execution);
                match scope {
                    VariableScope::Execution => self.store.set_execution_var(key, value)?,
                    VariableScope::Node(node) => self.store.set_node_local(node, key, value)?,
                    VariableScope::Global => {
                        return Err(ExecutionError::ReadOnlyVariable { key });
                    }
                }
            }
            EventType::ExecutionCompleted => {
                self.phase = ExecutionPhase::Completed;
                self.finished_at = Some(ts);
                for (key, value) in object_field(event, "variables") {
                    self.store.set_execution_var(key, value)?;
                }
            }
            EventType::ExecutionFailed => {
                self.phase = ExecutionPhase::Failed;
                self.finished_at = Some(ts);
                self.error = event
                    .data_field("error")
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
            }
            // Audit-only events: no derived state beyond the version bump.
            EventType::CircuitOpened | EventType::CircuitClosed | EventType::ConditionWarning => {}
        }

        self.version = event.sequence;
        Ok(())
    }
}

fn object_field(event: &Event, key: &str) -> serde_json::Map<String, Value> {
    event
        .data_field(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn u32_field(event: &Event, key: &str) -> u32 {
    event
        .data_field(key)
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}
