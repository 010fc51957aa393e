//! Batch roll-up and per-repository operation reports

use serde::Serialize;

use crate::models::BatchStatus;
use crate::status::{Bucket, RepositoryStatus};

/// Derive a batch status from its members.
///
/// `wont_migrate` members are ignored. The result is never more advanced
/// than the members: a batch is only `completed` when every counted member
/// is.
pub fn rollup<I>(statuses: I) -> BatchStatus
where
    I: IntoIterator<Item = RepositoryStatus>,
{
    let counted: Vec<RepositoryStatus> = statuses
        .into_iter()
        .filter(|s| *s != RepositoryStatus::WontMigrate)
        .collect();

    if counted.is_empty() {
        return BatchStatus::Pending;
    }

    if counted.iter().any(|s| is_in_flight(*s)) {
        return BatchStatus::InProgress;
    }

    if counted.iter().all(|s| s.bucket() == Bucket::Completed) {
        return BatchStatus::Completed;
    }

    // Failed dry-runs alone leave the batch where it was before migrating
    if counted.iter().all(|s| s.is_terminal())
        && counted.iter().any(|s| attempted_migration(*s))
    {
        return BatchStatus::CompletedWithErrors;
    }

    if counted
        .iter()
        .all(|s| *s == RepositoryStatus::DryRunComplete)
    {
        return BatchStatus::Ready;
    }

    BatchStatus::Pending
}

/// The repository finished at least one migration attempt
pub(crate) fn attempted_migration(status: RepositoryStatus) -> bool {
    matches!(
        status,
        RepositoryStatus::Complete
            | RepositoryStatus::MigrationComplete
            | RepositoryStatus::MigrationFailed
            | RepositoryStatus::RolledBack
    )
}

/// Migration work is queued or running, or a dry-run is executing
pub(crate) fn is_in_flight(status: RepositoryStatus) -> bool {
    status.bucket() == Bucket::InProgress || status == RepositoryStatus::DryRunInProgress
}

/// One repository a batch operation could not apply to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryFailure {
    pub repository_id: i64,
    pub reason: String,
}

/// Outcome of a batch operation, per repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOperationReport {
    pub succeeded: Vec<i64>,
    pub failed: Vec<RepositoryFailure>,

    /// Job launched by the operation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_id: Option<i64>,
}

impl BatchOperationReport {
    pub fn succeed(&mut self, repository_id: i64) {
        self.succeeded.push(repository_id);
    }

    pub fn fail(&mut self, repository_id: i64, reason: impl Into<String>) {
        self.failed.push(RepositoryFailure {
            repository_id,
            reason: reason.into(),
        });
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}
