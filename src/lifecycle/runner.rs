//! Body of supervised batch dry-run and migration jobs
//!
//! Queued members are processed one at a time. Cancellation is observed
//! between repositories: a repository whose work has started is driven to
//! a terminal status, the rest stay queued for a later run.

use std::sync::Arc;

use tracing::{info, warn};

use super::coordinator::{checked_transition, refresh_batch};
use super::executor::{ExecutorError, MigrationExecutor, MigrationPhase};
use crate::jobs::{JobContext, JobError, JobResult};
use crate::models::{JobScope, ProgressPhase, Repository};
use crate::status::RepositoryStatus;
use crate::storage::{RepositoryFilter, SharedDataStore};
use crate::utils::retry::{with_retry_if, RetryConfig};
use crate::utils::sanitize_message;

/// Which kind of batch run a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    DryRun,
    Migration,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Migration => "migration",
        }
    }

    /// Status members wait in until the job picks them up
    pub fn queued_status(&self) -> RepositoryStatus {
        match self {
            Self::DryRun => RepositoryStatus::DryRunQueued,
            Self::Migration => RepositoryStatus::QueuedForMigration,
        }
    }

    pub fn scope(&self, batch_id: i64) -> JobScope {
        match self {
            Self::DryRun => JobScope::DryRun { batch_id },
            Self::Migration => JobScope::Migration { batch_id },
        }
    }
}

fn executor_retry() -> RetryConfig {
    RetryConfig::with_delays(2, 500, 5_000)
}

/// Process every queued member of a batch
pub async fn run_batch(
    ctx: JobContext,
    batch_id: i64,
    mode: RunMode,
    executor: Arc<dyn MigrationExecutor>,
) -> JobResult<()> {
    let store = ctx.store.clone();
    ctx.progress.set_phase(ProgressPhase::Migrating).await?;

    let queued = store
        .list_repositories(
            &RepositoryFilter::for_batch(batch_id).with_status(mode.queued_status()),
        )
        .await?;
    ctx.progress.add_repos(queued.len() as u64).await?;

    info!(
        progress_id = ctx.progress_id,
        batch_id = batch_id,
        mode = mode.as_str(),
        repositories = queued.len(),
        "Batch run started"
    );

    let mut cancelled = false;
    for candidate in queued {
        if ctx.is_cancelled() {
            cancelled = true;
            break;
        }

        // Skip members dequeued or reassigned since the listing
        let Some(repo) = store.get_repository(candidate.id).await? else {
            continue;
        };
        if repo.status != mode.queued_status() || repo.batch_id != Some(batch_id) {
            continue;
        }

        let succeeded = match mode {
            RunMode::DryRun => dry_run_one(&store, executor.as_ref(), &repo).await?,
            RunMode::Migration => migrate_one(&store, executor.as_ref(), &repo).await?,
        };

        if succeeded {
            ctx.progress.inc_processed_repos().await?;
        } else {
            ctx.progress.inc_failed_repos().await?;
        }
    }

    ctx.progress.set_phase(ProgressPhase::Finalizing).await?;
    let batch = refresh_batch(&store, batch_id).await?;

    let counters = ctx.progress.snapshot();
    info!(
        progress_id = ctx.progress_id,
        batch = %batch.name,
        status = batch.status.as_str(),
        processed = counters.processed_repos,
        failed = counters.failed_repos,
        cancelled = cancelled,
        "Batch run finished"
    );

    if cancelled {
        return Err(JobError::Cancelled);
    }
    Ok(())
}

async fn dry_run_one(
    store: &SharedDataStore,
    executor: &dyn MigrationExecutor,
    repo: &Repository,
) -> JobResult<bool> {
    let running = checked_transition(
        store,
        repo,
        RepositoryStatus::DryRunInProgress,
        "dry_run",
        None,
    )
    .await?;

    let result = with_retry_if(
        &executor_retry(),
        || executor.dry_run(&running),
        ExecutorError::is_recoverable,
    )
    .await;

    match result {
        Ok(()) => {
            checked_transition(
                store,
                &running,
                RepositoryStatus::DryRunComplete,
                "dry_run",
                None,
            )
            .await?;
            Ok(true)
        }
        Err(e) => {
            warn!(repository = %repo.full_name, error = %e, "Dry-run failed");
            checked_transition(
                store,
                &running,
                RepositoryStatus::DryRunFailed,
                "dry_run",
                Some(sanitize_message(&e.to_string())),
            )
            .await?;
            Ok(false)
        }
    }
}

async fn migrate_one(
    store: &SharedDataStore,
    executor: &dyn MigrationExecutor,
    repo: &Repository,
) -> JobResult<bool> {
    let mut current = repo.clone();

    for phase in MigrationPhase::ORDER {
        current = checked_transition(store, &current, phase.status(), "migration", None).await?;

        let result = with_retry_if(
            &executor_retry(),
            || executor.run_phase(&current, phase),
            ExecutorError::is_recoverable,
        )
        .await;

        if let Err(e) = result {
            warn!(
                repository = %repo.full_name,
                phase = phase.as_str(),
                error = %e,
                "Migration step failed"
            );
            checked_transition(
                store,
                &current,
                RepositoryStatus::MigrationFailed,
                "migration",
                Some(sanitize_message(&format!("{}: {e}", phase.as_str()))),
            )
            .await?;
            return Ok(false);
        }
    }

    checked_transition(store, &current, RepositoryStatus::Complete, "migration", None).await?;
    Ok(true)
}
