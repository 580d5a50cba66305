//! Lifecycle notifications and the observer contract.

use std::time::Duration;

use mbflow_core::{ExecutionId, NodeId, WorkflowId};
use serde_json::Value;

/// A lifecycle notification delivered to observers.
///
/// Notifications mirror the event stream but carry pre-extracted fields so
/// observers do not need to parse event payloads.
#[derive(Debug, Clone)]
pub enum Notification {
    /// The execution started.
    ExecutionStarted {
        /// The execution.
        execution_id: ExecutionId,
        /// The workflow being executed.
        workflow_id: WorkflowId,
    },
    /// The execution completed successfully.
    ExecutionCompleted {
        /// The execution.
        execution_id: ExecutionId,
        /// Wall-clock duration of the whole run.
        duration: Duration,
    },
    /// The execution failed.
    ExecutionFailed {
        /// The execution.
        execution_id: ExecutionId,
        /// Terminal error message.
        error: String,
        /// Wall-clock duration of the whole run.
        duration: Duration,
    },
    /// A node began running.
    NodeStarted {
        /// The execution.
        execution_id: ExecutionId,
        /// The node.
        node_id: NodeId,
        /// The node's name.
        node_name: String,
        /// Attempt number (0 on first run).
        attempt: u32,
    },
    /// A node finished successfully.
    NodeCompleted {
        /// The execution.
        execution_id: ExecutionId,
        /// The node.
        node_id: NodeId,
        /// The node's name.
        node_name: String,
        /// The node's output map.
        output: serde_json::Map<String, Value>,
        /// How long the node ran.
        duration: Duration,
    },
    /// A node failed.
    NodeFailed {
        /// The execution.
        execution_id: ExecutionId,
        /// The node.
        node_id: NodeId,
        /// The node's name.
        node_name: String,
        /// The failure message.
        error: String,
        /// How long the node ran.
        duration: Duration,
        /// `true` when another attempt is scheduled.
        will_retry: bool,
    },
    /// A node attempt failed and a retry is scheduled.
    NodeRetrying {
        /// The execution.
        execution_id: ExecutionId,
        /// The node.
        node_id: NodeId,
        /// The node's name.
        node_name: String,
        /// The upcoming attempt number.
        attempt: u32,
        /// Backoff delay before the attempt.
        delay: Duration,
    },
    /// An execution-scoped variable was written.
    VariableSet {
        /// The execution.
        execution_id: ExecutionId,
        /// Variable name.
        key: String,
        /// Variable value.
        value: Value,
    },
}

impl Notification {
    /// The execution this notification belongs to.
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeFailed { execution_id, .. }
            | Self::NodeRetrying { execution_id, .. }
            | Self::VariableSet { execution_id, .. } => *execution_id,
        }
    }
}

/// Receives lifecycle notifications.
///
/// All callbacks are fire-and-forget: implementations must return quickly
/// and must never panic the caller. The fan-out delivers notifications on a
/// dedicated task per observer, in publication order.
pub trait Observer: Send + Sync {
    /// The execution started.
    fn on_execution_started(&self, _execution_id: ExecutionId, _workflow_id: WorkflowId) {}

    /// The execution completed successfully.
    fn on_execution_completed(&self, _execution_id: ExecutionId, _duration: Duration) {}

    /// The execution failed.
    fn on_execution_failed(&self, _execution_id: ExecutionId, _error: &str, _duration: Duration) {}

    /// A node began running.
    fn on_node_started(&self, _execution_id: ExecutionId, _node: NodeId, _name: &str, _attempt: u32) {
    }

    /// A node finished successfully.
    fn on_node_completed(
        &self,
        _execution_id: ExecutionId,
        _node: NodeId,
        _name: &str,
        _output: &serde_json::Map<String, Value>,
        _duration: Duration,
    ) {
    }

    /// A node failed.
    fn on_node_failed(
        &self,
        _execution_id: ExecutionId,
        _node: NodeId,
        _name: &str,
        _error: &str,
        _duration: Duration,
        _will_retry: bool,
    ) {
    }

    /// A node attempt is being retried.
    fn on_node_retrying(
        &self,
        _execution_id: ExecutionId,
        _node: NodeId,
        _name: &str,
        _attempt: u32,
        _delay: Duration,
    ) {
    }

    /// An execution-scoped variable was written.
    fn on_variable_set(&self, _execution_id: ExecutionId, _key: &str, _value: &Value) {}
}

/// Route a notification to the matching observer callback.
pub fn dispatch(observer: &dyn Observer, notification: &Notification) {
    match notification {
        Notification::ExecutionStarted {
            execution_id,
            workflow_id,
        } => observer.on_execution_started(*execution_id, *workflow_id),
        Notification::ExecutionCompleted {
            execution_id,
            duration,
        } => observer.on_execution_completed(*execution_id, *duration),
        Notification::ExecutionFailed {
            execution_id,
            error,
            duration,
        } => observer.on_execution_failed(*execution_id, error, *duration),
        Notification::NodeStarted {
            execution_id,
            node_id,
            node_name,
            attempt,
        } => observer.on_node_started(*execution_id, *node_id, node_name, *attempt),
        Notification::NodeCompleted {
            execution_id,
            node_id,
            node_name,
            output,
            duration,
        } => observer.on_node_completed(*execution_id, *node_id, node_name, output, *duration),
        Notification::NodeFailed {
            execution_id,
            node_id,
            node_name,
            error,
            duration,
            will_retry,
        } => observer.on_node_failed(
            *execution_id,
            *node_id,
            node_name,
            error,
            *duration,
            *will_retry,
        ),
        Notification::NodeRetrying {
            execution_id,
            node_id,
            node_name,
            attempt,
            delay,
        } => observer.on_node_retrying(*execution_id, *node_id, node_name, *attempt, *delay),
        Notification::VariableSet {
            execution_id,
            key,
            value,
        } => observer.on_variable_set(*execution_id, key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter {
        started: AtomicU32,
        completed: AtomicU32,
    }

    impl Observer for Counter {
        fn on_node_started(&self, _: ExecutionId, _: NodeId, _: &str, _: u32) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_node_completed(
            &self,
            _: ExecutionId,
            _: NodeId,
            _: &str,
            _: &serde_json::Map<String, Value>,
            _: Duration,
        ) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_routes_to_matching_callback() {
        let counter = Counter::default();
        let exec = ExecutionId::v4();
        let node = NodeId::v4();

        dispatch(
            &counter,
            &Notification::NodeStarted {
                execution_id: exec,
                node_id: node,
                node_name: "n".into(),
                attempt: 0,
            },
        );
        dispatch(
            &counter,
            &Notification::NodeCompleted {
                execution_id: exec,
                node_id: node,
                node_name: "n".into(),
                output: serde_json::Map::new(),
                duration: Duration::from_millis(1),
            },
        );
        // Unhandled callbacks fall through to the no-op defaults.
        dispatch(
            &counter,
            &Notification::VariableSet {
                execution_id: exec,
                key: "k".into(),
                value: Value::Null,
            },
        );

        assert_eq!(counter.started.load(Ordering::SeqCst), 1);
        assert_eq!(counter.completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn execution_id_accessor_covers_all_variants() {
        let exec = ExecutionId::v4();
        let notifications = [
            Notification::ExecutionStarted {
                execution_id: exec,
                workflow_id: WorkflowId::v4(),
            },
            Notification::ExecutionCompleted {
                execution_id: exec,
                duration: Duration::ZERO,
            },
            Notification::VariableSet {
                execution_id: exec,
                key: "k".into(),
                value: Value::Null,
            },
        ];
        for n in &notifications {
            assert_eq!(n.execution_id(), exec);
        }
    }
}
