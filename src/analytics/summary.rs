//! Progress summary derived from a status snapshot

use serde::{Deserialize, Serialize};

use crate::status::StatusCounts;

/// Bucketed progress totals with derived rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Repositories counted toward progress (excludes `wont_migrate`)
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,

    /// `wont_migrate` repositories, reported separately
    pub excluded: u64,

    /// completed / total, 0.0 when total is 0
    pub completion_rate: f64,

    /// completed / (completed + failed), 0.0 when nothing has finished
    pub success_rate: f64,
}

impl ProgressSummary {
    pub fn from_counts(counts: &StatusCounts) -> Self {
        let buckets = counts.bucketed();
        let total = buckets.total();
        let finished = buckets.completed + buckets.failed;

        Self {
            total,
            pending: buckets.pending,
            in_progress: buckets.in_progress,
            completed: buckets.completed,
            failed: buckets.failed,
            excluded: buckets.excluded,
            completion_rate: ratio(buckets.completed, total),
            success_rate: ratio(buckets.completed, finished),
        }
    }

    /// Repositories not yet completed or failed
    pub fn remaining(&self) -> u64 {
        self.pending + self.in_progress
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
