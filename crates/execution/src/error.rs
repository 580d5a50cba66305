//! Execution error types.

use mbflow_core::NodeId;
use thiserror::Error;

use crate::status::{ExecutionPhase, NodeStatus};

/// Errors that can occur while driving an execution aggregate.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A phase transition is not valid for the current phase.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase or status.
        from: String,
        /// Attempted target phase or status.
        to: String,
    },

    /// A command was issued against an aggregate in the wrong phase.
    ///
    /// This indicates a scheduler bug and is surfaced as a fatal internal
    /// error.
    #[error("invalid state: {command} requires {required}, but execution is {actual}")]
    InvalidState {
        /// The rejected command.
        command: &'static str,
        /// What the command needs.
        required: String,
        /// What the aggregate was in.
        actual: String,
    },

    /// A write was attempted against the frozen global context.
    #[error("variable {key:?} is read-only: the global context is frozen after start")]
    ReadOnlyVariable {
        /// The variable that was written.
        key: String,
    },

    /// A node referenced by a command has no state and cannot accept it.
    #[error("node {0} has not been started")]
    NodeNotStarted(NodeId),
}

impl ExecutionError {
    /// Create an invalid-transition error from execution phases.
    #[must_use]
    pub fn invalid_phase_transition(from: ExecutionPhase, to: ExecutionPhase) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an invalid-transition error from node statuses.
    #[must_use]
    pub fn invalid_node_transition(from: NodeStatus, to: NodeStatus) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an invalid-state error for a rejected command.
    #[must_use]
    pub fn invalid_state(
        command: &'static str,
        required: impl Into<String>,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidState {
            command,
            required: required.into(),
            actual: actual.to_string(),
        }
    }
}
