//! Engine error types.

use mbflow_events::EventError;
use mbflow_execution::{ExecutionError, PlanError};
use thiserror::Error;

use crate::binder::BindError;

/// Top-level engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow failed plan compilation; the execution never starts.
    #[error("plan compilation failed: {0}")]
    Plan(#[from] PlanError),

    /// A command was rejected by the execution aggregate. This is a
    /// scheduler bug surfaced as a fatal internal error.
    #[error("aggregate rejected command: {0}")]
    Execution(#[from] ExecutionError),

    /// The event store failed to persist events.
    #[error("event persistence failed: {0}")]
    Event(#[from] EventError),

    /// Input binding failed for a node.
    #[error("input binding failed: {0}")]
    Bind(#[from] BindError),

    /// No executor is registered for a node kind.
    #[error("no executor registered for node kind {kind:?}")]
    UnknownNodeKind {
        /// The unresolved kind tag.
        kind: String,
    },

    /// An executor was registered twice for the same kind.
    #[error("executor already registered for node kind {kind:?}")]
    ExecutorAlreadyRegistered {
        /// The duplicated kind tag.
        kind: String,
    },

    /// The execution was cancelled before it could finish.
    #[error("execution cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_display() {
        let err = EngineError::UnknownNodeKind {
            kind: "llm".into(),
        };
        assert_eq!(err.to_string(), "no executor registered for node kind \"llm\"");
    }

    #[test]
    fn plan_error_converts() {
        let plan_err = PlanError::Workflow(mbflow_workflow::WorkflowError::Empty);
        let err: EngineError = plan_err.into();
        assert!(err.to_string().contains("plan compilation failed"));
    }
}
