//! Error strategies: what a node failure means for the execution.

use serde::{Deserialize, Serialize};

/// Decides whether a node failure aborts the execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Abort on any failure.
    #[default]
    FailFast,
    /// Never abort; record the failure and keep running.
    ContinueOnError,
    /// Never abort; downstream joins see failed branches and still
    /// progress.
    BestEffort,
    /// Abort only when the number of completed nodes can no longer reach
    /// `min_required`.
    RequireN {
        /// Minimum completions the execution must still be able to reach.
        min_required: usize,
    },
}

impl ErrorStrategy {
    /// Should the execution abort, given the current counts?
    ///
    /// `completed` and `failed` count settled nodes, `total` is the number
    /// of candidate nodes.
    #[must_use]
    pub fn should_abort(&self, completed: usize, failed: usize, total: usize) -> bool {
        match self {
            Self::FailFast => failed > 0,
            Self::ContinueOnError | Self::BestEffort => false,
            Self::RequireN { min_required } => {
                let undecided = total.saturating_sub(completed + failed);
                completed + undecided < *min_required
            }
        }
    }

    /// Returns `true` if failed branches should be tolerated rather than
    /// aborting the run.
    #[must_use]
    pub fn tolerates_failures(&self) -> bool {
        !matches!(self, Self::FailFast)
    }
}
