//! State machine transition validation for execution phases and node
//! statuses.
//!
//! Terminal phases and statuses are sinks: nothing transitions out of
//! them, and rebuilding from events relies on the same tables.

use crate::error::ExecutionError;
use crate::status::{ExecutionPhase, NodeStatus};

/// Returns `true` if the phase transition from `from` to `to` is valid.
#[must_use]
pub fn can_transition_phase(from: ExecutionPhase, to: ExecutionPhase) -> bool {
    matches!(
        (from, to),
        (ExecutionPhase::Planning, ExecutionPhase::Executing)
            | (ExecutionPhase::Executing, ExecutionPhase::Paused)
            | (ExecutionPhase::Executing, ExecutionPhase::Completed)
            | (ExecutionPhase::Executing, ExecutionPhase::Failed)
            | (ExecutionPhase::Executing, ExecutionPhase::Cancelled)
            | (ExecutionPhase::Paused, ExecutionPhase::Executing)
            | (ExecutionPhase::Paused, ExecutionPhase::Completed)
            | (ExecutionPhase::Paused, ExecutionPhase::Failed)
            | (ExecutionPhase::Paused, ExecutionPhase::Cancelled)
    )
}

/// Validate a phase transition, returning an error if invalid.
pub fn validate_phase_transition(
    from: ExecutionPhase,
    to: ExecutionPhase,
) -> Result<(), ExecutionError> {
    if can_transition_phase(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_phase_transition(from, to))
    }
}

/// Returns `true` if the node-status transition from `from` to `to` is
/// valid.
#[must_use]
pub fn can_transition_node(from: NodeStatus, to: NodeStatus) -> bool {
    matches!(
        (from, to),
        (NodeStatus::Pending, NodeStatus::Running)
            | (NodeStatus::Pending, NodeStatus::Skipped)
            | (NodeStatus::Running, NodeStatus::Completed)
            | (NodeStatus::Running, NodeStatus::Failed)
            | (NodeStatus::Running, NodeStatus::Skipped)
    )
}

/// Validate a node-status transition, returning an error if invalid.
pub fn validate_node_transition(from: NodeStatus, to: NodeStatus) -> Result<(), ExecutionError> {
    if can_transition_node(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_node_transition(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ExecutionPhase::Planning, ExecutionPhase::Executing)]
    #[case(ExecutionPhase::Executing, ExecutionPhase::Paused)]
    #[case(ExecutionPhase::Executing, ExecutionPhase::Completed)]
    #[case(ExecutionPhase::Executing, ExecutionPhase::Failed)]
    #[case(ExecutionPhase::Executing, ExecutionPhase::Cancelled)]
    #[case(ExecutionPhase::Paused, ExecutionPhase::Executing)]
    #[case(ExecutionPhase::Paused, ExecutionPhase::Cancelled)]
    fn valid_phase_transitions(#[case] from: ExecutionPhase, #[case] to: ExecutionPhase) {
        assert!(can_transition_phase(from, to), "{from} -> {to}");
    }

    #[rstest]
    #[case(ExecutionPhase::Planning, ExecutionPhase::Completed)]
    #[case(ExecutionPhase::Planning, ExecutionPhase::Paused)]
    #[case(ExecutionPhase::Completed, ExecutionPhase::Executing)]
    #[case(ExecutionPhase::Failed, ExecutionPhase::Executing)]
    #[case(ExecutionPhase::Cancelled, ExecutionPhase::Executing)]
    #[case(ExecutionPhase::Executing, ExecutionPhase::Planning)]
    #[case(ExecutionPhase::Executing, ExecutionPhase::Executing)]
    fn invalid_phase_transitions(#[case] from: ExecutionPhase, #[case] to: ExecutionPhase) {
        assert!(!can_transition_phase(from, to), "{from} -> {to}");
    }

    #[test]
    fn terminal_phases_are_sinks() {
        let all = [
            ExecutionPhase::Planning,
            ExecutionPhase::Executing,
            ExecutionPhase::Paused,
            ExecutionPhase::Completed,
            ExecutionPhase::Failed,
            ExecutionPhase::Cancelled,
        ];
        for from in all.iter().filter(|p| p.is_terminal()) {
            for to in &all {
                assert!(!can_transition_phase(*from, *to), "{from} -> {to}");
            }
        }
    }

    #[rstest]
    #[case(NodeStatus::Pending, NodeStatus::Running)]
    #[case(NodeStatus::Pending, NodeStatus::Skipped)]
    #[case(NodeStatus::Running, NodeStatus::Completed)]
    #[case(NodeStatus::Running, NodeStatus::Failed)]
    #[case(NodeStatus::Running, NodeStatus::Skipped)]
    fn valid_node_transitions(#[case] from: NodeStatus, #[case] to: NodeStatus) {
        assert!(can_transition_node(from, to), "{from} -> {to}");
    }

    #[rstest]
    #[case(NodeStatus::Pending, NodeStatus::Completed)]
    #[case(NodeStatus::Pending, NodeStatus::Failed)]
    #[case(NodeStatus::Completed, NodeStatus::Running)]
    #[case(NodeStatus::Failed, NodeStatus::Running)]
    #[case(NodeStatus::Skipped, NodeStatus::Running)]
    #[case(NodeStatus::Running, NodeStatus::Running)]
    fn invalid_node_transitions(#[case] from: NodeStatus, #[case] to: NodeStatus) {
        assert!(!can_transition_node(from, to), "{from} -> {to}");
    }

    #[test]
    fn validate_returns_descriptive_errors() {
        let err = validate_phase_transition(ExecutionPhase::Completed, ExecutionPhase::Executing)
            .unwrap_err();
        assert!(err.to_string().contains("invalid transition"));

        let err = validate_node_transition(NodeStatus::Pending, NodeStatus::Completed).unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
    }
}
