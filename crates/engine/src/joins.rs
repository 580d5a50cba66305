//! Fan-in tracking for join targets.

use std::collections::HashMap;

use indexmap::IndexMap;
use mbflow_core::{EdgeId, NodeId};
use mbflow_execution::ExecutionPlan;
use mbflow_workflow::JoinStrategy;
use parking_lot::Mutex;

/// The settled state of one incoming join branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStatus {
    /// The branch has not settled yet.
    Pending,
    /// The branch completed successfully.
    Completed,
    /// The branch failed (a tolerated failure still signals the join).
    Failed,
    /// The branch was skipped.
    Skipped,
}

/// What the coordinator decided for a join target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
    /// Branches are still pending and the strategy is still satisfiable.
    StillPending,
    /// The strategy is satisfied; the target is released.
    Release,
    /// The strategy can no longer be satisfied; the target is skipped
    /// (or failed, per the error strategy).
    Skip,
}

#[derive(Debug)]
struct PendingFanIn {
    strategy: JoinStrategy,
    branches: IndexMap<EdgeId, BranchStatus>,
}

impl PendingFanIn {
    fn decide(&self) -> JoinDecision {
        let completed = self
            .branches
            .values()
            .filter(|s| **s == BranchStatus::Completed)
            .count();
        let pending = self
            .branches
            .values()
            .filter(|s| **s == BranchStatus::Pending)
            .count();

        match self.strategy {
            JoinStrategy::WaitAll => {
                if pending > 0 {
                    JoinDecision::StillPending
                } else if completed > 0 {
                    JoinDecision::Release
                } else {
                    JoinDecision::Skip
                }
            }
            JoinStrategy::WaitAny | JoinStrategy::WaitFirst => {
                if completed > 0 {
                    JoinDecision::Release
                } else if pending > 0 {
                    JoinDecision::StillPending
                } else {
                    JoinDecision::Skip
                }
            }
            JoinStrategy::WaitN(n) => {
                let n = n as usize;
                if completed >= n {
                    JoinDecision::Release
                } else if completed + pending < n {
                    JoinDecision::Skip
                } else {
                    JoinDecision::StillPending
                }
            }
        }
    }
}

/// Tracks per-target fan-in and decides when join targets release.
#[derive(Debug)]
pub struct JoinCoordinator {
    targets: Mutex<HashMap<NodeId, PendingFanIn>>,
}

impl JoinCoordinator {
    /// Build the coordinator from a compiled plan.
    #[must_use]
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let mut targets = HashMap::new();
        for (node, spec) in &plan.join_targets {
            targets.insert(
                *node,
                PendingFanIn {
                    strategy: spec.strategy,
                    branches: spec
                        .edges
                        .iter()
                        .map(|edge| (*edge, BranchStatus::Pending))
                        .collect(),
                },
            );
        }
        Self {
            targets: Mutex::new(targets),
        }
    }

    /// Returns `true` if `node` is tracked as a join target.
    #[must_use]
    pub fn is_join_target(&self, node: NodeId) -> bool {
        self.targets.lock().contains_key(&node)
    }

    /// Record a settled branch and return the target's current decision.
    ///
    /// Unknown targets release immediately (they are not joins).
    pub fn signal(&self, target: NodeId, edge: EdgeId, status: BranchStatus) -> JoinDecision {
        let mut targets = self.targets.lock();
        let Some(fan_in) = targets.get_mut(&target) else {
            return JoinDecision::Release;
        };
        if let Some(branch) = fan_in.branches.get_mut(&edge) {
            // A branch settles once; later signals (loop re-runs) replace
            // the previous status.
            *branch = status;
        }
        fan_in.decide()
    }

    /// The current decision for a target, without signalling.
    #[must_use]
    pub fn decision(&self, target: NodeId) -> JoinDecision {
        self.targets
            .lock()
            .get(&target)
            .map_or(JoinDecision::Release, PendingFanIn::decide)
    }

    /// Branches of `target` that completed, in edge order.
    #[must_use]
    pub fn completed_branches(&self, target: NodeId) -> Vec<EdgeId> {
        self.targets.lock().get(&target).map_or_else(Vec::new, |f| {
            f.branches
                .iter()
                .filter(|(_, s)| **s == BranchStatus::Completed)
                .map(|(e, _)| *e)
                .collect()
        })
    }
}
