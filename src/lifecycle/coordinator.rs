//! Lifecycle coordinator
//!
//! Every repository status change goes through here so that the
//! transition table is enforced and a history entry is appended.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::batch::{is_in_flight, rollup, BatchOperationReport};
use super::executor::MigrationExecutor;
use super::runner::{self, RunMode};
use super::{LifecycleError, LifecycleResult};
use crate::jobs::{JobError, JobSupervisor};
use crate::metrics;
use crate::models::{Batch, BatchStatus, MigrationHistory, Repository};
use crate::status::{Bucket, RepositoryStatus};
use crate::storage::{RepositoryFilter, SharedDataStore};
use crate::utils::sanitize_message;

/// Persist a status change and its history entry without checking the table
pub(crate) async fn record_status(
    store: &SharedDataStore,
    repo: &Repository,
    to: RepositoryStatus,
    phase: &str,
    message: Option<String>,
) -> LifecycleResult<Repository> {
    let updated = store.update_repository_status(repo.id, to).await?;
    store
        .append_history(&MigrationHistory::entry(
            repo.id, repo.status, to, phase, message,
        ))
        .await?;

    metrics::record_transition(to.as_str());
    debug!(
        repository = %repo.full_name,
        from = repo.status.as_str(),
        to = to.as_str(),
        phase = phase,
        "Repository status changed"
    );
    Ok(updated)
}

/// Persist a status change that must follow the transition table
pub(crate) async fn checked_transition(
    store: &SharedDataStore,
    repo: &Repository,
    to: RepositoryStatus,
    phase: &str,
    message: Option<String>,
) -> LifecycleResult<Repository> {
    if !repo.status.can_transition_to(to) {
        return Err(LifecycleError::InvalidTransition {
            repository_id: repo.id,
            from: repo.status,
            to,
        });
    }
    record_status(store, repo, to, phase, message).await
}

/// Recompute and persist a batch's roll-up status
pub(crate) async fn refresh_batch(store: &SharedDataStore, batch_id: i64) -> LifecycleResult<Batch> {
    let mut batch = store
        .get_batch(batch_id)
        .await?
        .ok_or(LifecycleError::NotFound {
            entity: "batch",
            id: batch_id,
        })?;

    let members = store
        .list_repositories(&RepositoryFilter::for_batch(batch_id))
        .await?;
    let status = rollup(members.iter().map(|r| r.status));

    if status != batch.status {
        let finished = matches!(
            status,
            BatchStatus::Completed | BatchStatus::CompletedWithErrors
        );
        batch.completed_at = if finished { Some(Utc::now()) } else { None };
        if status == BatchStatus::InProgress && batch.started_at.is_none() {
            batch.started_at = Some(Utc::now());
        }

        info!(
            batch = %batch.name,
            from = batch.status.as_str(),
            to = status.as_str(),
            "Batch status changed"
        );
        batch.status = status;
        store.update_batch(&batch).await?;
    }
    Ok(batch)
}

/// Entry point for repository and batch lifecycle operations
#[derive(Clone)]
pub struct LifecycleCoordinator {
    store: SharedDataStore,
    supervisor: JobSupervisor,
    executor: Arc<dyn MigrationExecutor>,
}

impl LifecycleCoordinator {
    pub fn new(
        store: SharedDataStore,
        supervisor: JobSupervisor,
        executor: Arc<dyn MigrationExecutor>,
    ) -> Self {
        Self {
            store,
            supervisor,
            executor,
        }
    }

    pub fn store(&self) -> &SharedDataStore {
        &self.store
    }

    pub fn supervisor(&self) -> &JobSupervisor {
        &self.supervisor
    }

    // ------------------------------------------------------------------
    // Repositories
    // ------------------------------------------------------------------

    pub async fn get_repository(&self, id: i64) -> LifecycleResult<Repository> {
        self.store
            .get_repository(id)
            .await?
            .ok_or(LifecycleError::NotFound {
                entity: "repository",
                id,
            })
    }

    pub async fn list_repositories(
        &self,
        filter: &RepositoryFilter,
    ) -> LifecycleResult<Vec<Repository>> {
        Ok(self.store.list_repositories(filter).await?)
    }

    pub async fn history(&self, id: i64) -> LifecycleResult<Vec<MigrationHistory>> {
        self.get_repository(id).await?;
        Ok(self.store.list_history(id).await?)
    }

    /// Move a repository along the transition table
    pub async fn transition(&self, id: i64, to: RepositoryStatus) -> LifecycleResult<Repository> {
        let repo = self.get_repository(id).await?;
        let updated = checked_transition(&self.store, &repo, to, "manual", None).await?;
        self.refresh_membership(&updated).await?;
        Ok(updated)
    }

    /// Exclude a repository from migration. It also leaves its batch.
    pub async fn mark_wont_migrate(
        &self,
        id: i64,
        reason: Option<String>,
    ) -> LifecycleResult<Repository> {
        let repo = self.get_repository(id).await?;

        if repo.status == RepositoryStatus::WontMigrate {
            return Err(LifecycleError::validation(format!(
                "repository {} is already excluded",
                repo.full_name
            )));
        }
        if is_in_flight(repo.status) {
            return Err(LifecycleError::validation(format!(
                "repository {} has migration work in progress ({})",
                repo.full_name, repo.status
            )));
        }

        let updated = record_status(
            &self.store,
            &repo,
            RepositoryStatus::WontMigrate,
            "wont_migrate",
            reason,
        )
        .await?;

        if let Some(batch_id) = repo.batch_id {
            self.store.set_repository_batch(id, None).await?;
            refresh_batch(&self.store, batch_id).await?;
        }

        info!(repository = %repo.full_name, "Repository excluded from migration");
        Ok(Repository {
            batch_id: None,
            ..updated
        })
    }

    /// Return an excluded repository to `pending`
    pub async fn unmark_wont_migrate(&self, id: i64) -> LifecycleResult<Repository> {
        let repo = self.get_repository(id).await?;

        if repo.status != RepositoryStatus::WontMigrate {
            return Err(LifecycleError::validation(format!(
                "repository {} is not excluded",
                repo.full_name
            )));
        }

        record_status(
            &self.store,
            &repo,
            RepositoryStatus::Pending,
            "wont_migrate",
            Some("exclusion removed".to_string()),
        )
        .await
    }

    /// Mark a completed or failed repository as rolled back.
    ///
    /// History is appended, never removed, and batch membership is kept.
    pub async fn rollback(&self, id: i64, reason: Option<String>) -> LifecycleResult<Repository> {
        let repo = self.get_repository(id).await?;

        if !repo.status.can_roll_back() {
            return Err(LifecycleError::validation(format!(
                "repository {} cannot be rolled back from {}",
                repo.full_name, repo.status
            )));
        }

        let updated = record_status(
            &self.store,
            &repo,
            RepositoryStatus::RolledBack,
            "rollback",
            reason,
        )
        .await?;
        self.refresh_membership(&updated).await?;

        info!(repository = %repo.full_name, from = repo.status.as_str(), "Repository rolled back");
        Ok(updated)
    }

    async fn refresh_membership(&self, repo: &Repository) -> LifecycleResult<()> {
        if let Some(batch_id) = repo.batch_id {
            refresh_batch(&self.store, batch_id).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    pub async fn create_batch(
        &self,
        name: &str,
        description: Option<String>,
    ) -> LifecycleResult<Batch> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::validation("batch name must not be empty"));
        }

        let batch = self.store.create_batch(&Batch::new(name, description)).await?;
        info!(batch = %batch.name, batch_id = batch.id, "Batch created");
        Ok(batch)
    }

    pub async fn get_batch(&self, id: i64) -> LifecycleResult<Batch> {
        self.store
            .get_batch(id)
            .await?
            .ok_or(LifecycleError::NotFound { entity: "batch", id })
    }

    pub async fn list_batches(&self) -> LifecycleResult<Vec<Batch>> {
        Ok(self.store.list_batches().await?)
    }

    pub async fn refresh_batch_status(&self, id: i64) -> LifecycleResult<Batch> {
        refresh_batch(&self.store, id).await
    }

    /// Assign repositories to a batch, one verdict per repository
    pub async fn add_repositories(
        &self,
        batch_id: i64,
        repository_ids: &[i64],
    ) -> LifecycleResult<BatchOperationReport> {
        self.get_batch(batch_id).await?;
        let mut report = BatchOperationReport::default();

        for &id in repository_ids {
            let Some(repo) = self.store.get_repository(id).await? else {
                report.fail(id, "repository not found");
                continue;
            };

            match repo.batch_id {
                Some(current) if current == batch_id => {
                    report.succeed(id);
                    continue;
                }
                Some(other) => {
                    report.fail(id, format!("already assigned to batch {other}"));
                    continue;
                }
                None => {}
            }

            if repo.status == RepositoryStatus::WontMigrate {
                report.fail(id, "repository is excluded from migration");
            } else if repo.status.bucket() == Bucket::InProgress {
                report.fail(id, format!("migration in progress ({})", repo.status));
            } else {
                self.store.set_repository_batch(id, Some(batch_id)).await?;
                report.succeed(id);
            }
        }

        refresh_batch(&self.store, batch_id).await?;
        Ok(report)
    }

    /// Remove repositories from a batch, one verdict per repository
    pub async fn remove_repositories(
        &self,
        batch_id: i64,
        repository_ids: &[i64],
    ) -> LifecycleResult<BatchOperationReport> {
        self.get_batch(batch_id).await?;
        let mut report = BatchOperationReport::default();

        for &id in repository_ids {
            let Some(repo) = self.store.get_repository(id).await? else {
                report.fail(id, "repository not found");
                continue;
            };

            if repo.batch_id != Some(batch_id) {
                report.fail(id, "not a member of this batch");
            } else if is_in_flight(repo.status) {
                report.fail(id, format!("migration in progress ({})", repo.status));
            } else {
                self.store.set_repository_batch(id, None).await?;
                report.succeed(id);
            }
        }

        refresh_batch(&self.store, batch_id).await?;
        Ok(report)
    }

    /// Queue eligible members for a dry-run and launch the dry-run job
    pub async fn start_dry_run(&self, batch_id: i64) -> LifecycleResult<BatchOperationReport> {
        self.queue_and_launch(batch_id, RunMode::DryRun, |status| {
            status.can_transition_to(RepositoryStatus::DryRunQueued)
        })
        .await
    }

    /// Queue eligible members for migration and launch the migration job
    pub async fn start_migration(&self, batch_id: i64) -> LifecycleResult<BatchOperationReport> {
        self.queue_and_launch(batch_id, RunMode::Migration, |status| {
            status.can_transition_to(RepositoryStatus::QueuedForMigration)
        })
        .await
    }

    /// Re-queue members whose migration failed and launch the migration job
    pub async fn retry_batch(&self, batch_id: i64) -> LifecycleResult<BatchOperationReport> {
        self.queue_and_launch(batch_id, RunMode::Migration, |status| {
            status == RepositoryStatus::MigrationFailed
        })
        .await
    }

    /// Undo the queueing of a launch whose job never started
    async fn release_queued(
        &self,
        before_launch: &Batch,
        newly_queued: &[(Repository, RepositoryStatus)],
        cause: &JobError,
    ) -> LifecycleResult<()> {
        let message = format!("job not started: {}", sanitize_message(&cause.to_string()));
        for (repo, previous) in newly_queued {
            record_status(&self.store, repo, *previous, "release", Some(message.clone())).await?;
        }
        self.store.update_batch(before_launch).await?;
        refresh_batch(&self.store, before_launch.id).await?;
        Ok(())
    }

    async fn queue_and_launch(
        &self,
        batch_id: i64,
        mode: RunMode,
        eligible: impl Fn(RepositoryStatus) -> bool,
    ) -> LifecycleResult<BatchOperationReport> {
        let mut batch = self.get_batch(batch_id).await?;
        let scope = mode.scope(batch_id);

        // Fail fast while a job for this batch runs here; start() stays authoritative.
        // A registry entry whose record is already final is about to be removed.
        let scope_key = scope.scope_key();
        if let Some(running) = self
            .supervisor
            .running_jobs()
            .await?
            .into_iter()
            .find(|j| j.scope_key == scope_key)
        {
            let active = self
                .store
                .get_progress(running.progress_id)
                .await?
                .is_some_and(|p| p.is_active());
            if active {
                return Err(LifecycleError::Job(JobError::Conflict {
                    scope_key,
                    existing_id: running.progress_id,
                }));
            }
        }

        let members = self
            .store
            .list_repositories(&RepositoryFilter::for_batch(batch_id))
            .await?;
        if members.is_empty() {
            return Err(LifecycleError::validation(format!(
                "batch {} has no repositories",
                batch.name
            )));
        }

        let queued_status = mode.queued_status();
        let mut report = BatchOperationReport::default();
        let mut newly_queued = Vec::new();

        for repo in &members {
            if repo.status == RepositoryStatus::WontMigrate {
                continue;
            }
            if repo.status == queued_status {
                // Left queued by a cancelled run
                report.succeed(repo.id);
            } else if eligible(repo.status) {
                let queued =
                    record_status(&self.store, repo, queued_status, mode.as_str(), None).await?;
                newly_queued.push((queued, repo.status));
                report.succeed(repo.id);
            } else {
                report.fail(
                    repo.id,
                    format!("cannot queue {} from status {}", mode.as_str(), repo.status),
                );
            }
        }

        if report.succeeded.is_empty() {
            return Err(LifecycleError::validation(format!(
                "no repositories in batch {} are eligible for {}",
                batch.name,
                mode.as_str()
            )));
        }

        let before_launch = batch.clone();
        let now = Utc::now();
        match mode {
            RunMode::DryRun => batch.last_dry_run_at = Some(now),
            RunMode::Migration => {
                batch.last_migration_attempt_at = Some(now);
                batch.started_at.get_or_insert(now);
            }
        }
        self.store.update_batch(&batch).await?;
        refresh_batch(&self.store, batch_id).await?;

        let executor = Arc::clone(&self.executor);
        let progress_id = match self
            .supervisor
            .start(scope, move |ctx| runner::run_batch(ctx, batch_id, mode, executor))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    batch = %batch.name,
                    mode = mode.as_str(),
                    error = %e,
                    "Batch job did not start, releasing queued repositories"
                );
                if let Err(release) = self
                    .release_queued(&before_launch, &newly_queued, &e)
                    .await
                {
                    error!(
                        batch = %batch.name,
                        error = %release,
                        "Failed to release queued repositories"
                    );
                }
                return Err(e.into());
            }
        };

        info!(
            batch = %batch.name,
            progress_id = progress_id,
            queued = report.succeeded.len(),
            rejected = report.failed.len(),
            mode = mode.as_str(),
            "Batch job launched"
        );
        report.progress_id = Some(progress_id);
        Ok(report)
    }
}
