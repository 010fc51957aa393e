//! The `DataStore` contract
//!
//! Everything the engine persists goes through this trait. The one
//! operation with a concurrency contract is
//! [`DataStore::create_progress_if_none_active`]: the check for an active
//! record in the same scope and the insert must be a single atomic step.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::filter::RepositoryFilter;
use super::StoreResult;
use crate::models::{
    Batch, DiscoveryProgress, MigrationHistory, ProgressPhase, ProgressStatus, Repository,
    SourcePlatform,
};
use crate::status::{RepositoryStatus, StatusCounts};

/// Partial update of a running progress record.
///
/// Counters are absolute values. A record whose phase is already
/// `cancelling` keeps that phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Option<ProgressPhase>,
    pub total_orgs: Option<u64>,
    pub processed_orgs: Option<u64>,
    pub total_repos: Option<u64>,
    pub processed_repos: Option<u64>,
    pub failed_repos: Option<u64>,
}

impl ProgressUpdate {
    pub fn phase(phase: ProgressPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }
}

/// Persistence contract consumed by the engine
#[async_trait]
pub trait DataStore: Send + Sync {
    // ------------------------------------------------------------------
    // Progress records
    // ------------------------------------------------------------------

    /// Insert `progress` unless an in-progress record with the same scope key
    /// exists. Fails with `StoreError::ActiveScope` in that case.
    async fn create_progress_if_none_active(
        &self,
        progress: &DiscoveryProgress,
    ) -> StoreResult<DiscoveryProgress>;

    /// Get a progress record by id
    async fn get_progress(&self, id: i64) -> StoreResult<Option<DiscoveryProgress>>;

    /// Apply a partial update to an in-progress record.
    ///
    /// Updates to finalized records are ignored.
    async fn update_progress(&self, id: i64, update: &ProgressUpdate) -> StoreResult<()>;

    /// Finalize an in-progress record. Returns `false` if the record was
    /// already final.
    async fn finalize_progress(
        &self,
        id: i64,
        status: ProgressStatus,
        error_message: Option<&str>,
    ) -> StoreResult<bool>;

    /// Most recent progress records, newest first
    async fn list_progress(&self, limit: usize) -> StoreResult<Vec<DiscoveryProgress>>;

    /// In-progress records not updated since `older_than`
    async fn find_stale_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<DiscoveryProgress>>;

    // ------------------------------------------------------------------
    // Repositories
    // ------------------------------------------------------------------

    /// Insert a repository or refresh the source metadata of an existing one
    /// (matched by full name). Status and batch of an existing row are kept.
    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<Repository>;

    async fn get_repository(&self, id: i64) -> StoreResult<Option<Repository>>;

    async fn list_repositories(&self, filter: &RepositoryFilter) -> StoreResult<Vec<Repository>>;

    /// Set the status of a repository, stamping `migrated_at` on completion
    async fn update_repository_status(
        &self,
        id: i64,
        status: RepositoryStatus,
    ) -> StoreResult<Repository>;

    async fn set_repository_batch(&self, id: i64, batch_id: Option<i64>) -> StoreResult<()>;

    /// Repository counts by raw status string
    async fn status_counts(&self, filter: &RepositoryFilter) -> StoreResult<StatusCounts>;

    /// Completion timestamps since `since`, for velocity
    async fn completion_times(
        &self,
        filter: &RepositoryFilter,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DateTime<Utc>>>;

    /// Administrative cascade delete of a source organization's repositories
    /// and their history. Returns the number of repositories removed.
    async fn delete_by_source(
        &self,
        source: SourcePlatform,
        organization: &str,
    ) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    async fn create_batch(&self, batch: &Batch) -> StoreResult<Batch>;

    /// Get a batch; `repository_count` is computed from current members
    async fn get_batch(&self, id: i64) -> StoreResult<Option<Batch>>;

    async fn list_batches(&self) -> StoreResult<Vec<Batch>>;

    /// Persist status and timestamps of a batch
    async fn update_batch(&self, batch: &Batch) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    async fn append_history(&self, entry: &MigrationHistory) -> StoreResult<()>;

    /// History of one repository, oldest first
    async fn list_history(&self, repository_id: i64) -> StoreResult<Vec<MigrationHistory>>;
}

/// Thread-safe shared store handle
pub type SharedDataStore = Arc<dyn DataStore>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchStatus, DiscoveryType, JobScope};
    use crate::storage::{MemoryDataStore, SqliteDataStore, StoreError};
    use chrono::Duration;

    // Every contract test runs against both implementations
    fn create_test_stores() -> Vec<Box<dyn DataStore>> {
        vec![
            Box::new(SqliteDataStore::in_memory().unwrap()),
            Box::new(MemoryDataStore::new()),
        ]
    }

    fn org_scope(target: &str) -> JobScope {
        JobScope::discovery(DiscoveryType::Organization, target)
    }

    #[tokio::test]
    async fn test_create_progress_rejects_active_scope() {
        for store in create_test_stores() {
            let first = store
                .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("acme")))
                .await
                .unwrap();
            assert!(first.id > 0);

            let second = store
                .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("ACME")))
                .await;
            match second {
                Err(StoreError::ActiveScope { existing_id, .. }) => {
                    assert_eq!(existing_id, first.id)
                }
                other => panic!("expected ActiveScope, got {other:?}"),
            }

            // A different scope is independent
            assert!(store
                .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("globex")))
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn test_finalize_frees_scope_and_happens_once() {
        for store in create_test_stores() {
            let progress = store
                .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("acme")))
                .await
                .unwrap();

            assert!(store
                .finalize_progress(progress.id, ProgressStatus::Failed, Some("boom"))
                .await
                .unwrap());
            assert!(!store
                .finalize_progress(progress.id, ProgressStatus::Complete, None)
                .await
                .unwrap());

            let stored = store.get_progress(progress.id).await.unwrap().unwrap();
            assert_eq!(stored.status, ProgressStatus::Failed);
            assert_eq!(stored.phase, ProgressPhase::Done);
            assert_eq!(stored.error_message.as_deref(), Some("boom"));
            assert!(stored.completed_at.is_some());

            assert!(store
                .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("acme")))
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn test_update_progress_keeps_cancelling_phase() {
        for store in create_test_stores() {
            let progress = store
                .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("acme")))
                .await
                .unwrap();

            store
                .update_progress(progress.id, &ProgressUpdate::phase(ProgressPhase::Cancelling))
                .await
                .unwrap();
            store
                .update_progress(
                    progress.id,
                    &ProgressUpdate {
                        phase: Some(ProgressPhase::ProcessingRepos),
                        total_repos: Some(12),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();

            let stored = store.get_progress(progress.id).await.unwrap().unwrap();
            assert_eq!(stored.phase, ProgressPhase::Cancelling);
            assert_eq!(stored.total_repos, 12);
        }
    }

    #[tokio::test]
    async fn test_update_missing_progress_is_not_found() {
        for store in create_test_stores() {
            let result = store
                .update_progress(999, &ProgressUpdate::phase(ProgressPhase::Migrating))
                .await;
            assert!(matches!(result, Err(StoreError::NotFound { .. })));
        }
    }

    #[tokio::test]
    async fn test_find_stale_progress() {
        for store in create_test_stores() {
            let progress = store
                .create_progress_if_none_active(&DiscoveryProgress::start(&org_scope("acme")))
                .await
                .unwrap();

            let future = Utc::now() + Duration::seconds(60);
            let past = Utc::now() - Duration::seconds(60);

            let stale = store.find_stale_progress(future).await.unwrap();
            assert_eq!(stale.len(), 1);
            assert_eq!(stale[0].id, progress.id);
            assert!(store.find_stale_progress(past).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_status_and_batch() {
        for store in create_test_stores() {
            let repo = store
                .upsert_repository(&Repository::discovered("acme/api", SourcePlatform::Github))
                .await
                .unwrap();
            store
                .update_repository_status(repo.id, RepositoryStatus::DryRunQueued)
                .await
                .unwrap();

            let mut refreshed = Repository::discovered("acme/api", SourcePlatform::Github);
            refreshed.total_size_bytes = 4096;
            let again = store.upsert_repository(&refreshed).await.unwrap();

            assert_eq!(again.id, repo.id);
            assert_eq!(again.status, RepositoryStatus::DryRunQueued);
            assert_eq!(again.total_size_bytes, 4096);
        }
    }

    #[tokio::test]
    async fn test_status_counts_and_filters() {
        for store in create_test_stores() {
            let batch = store.create_batch(&Batch::new("wave-1", None)).await.unwrap();
            for (name, status) in [
                ("acme/a", RepositoryStatus::Complete),
                ("acme/b", RepositoryStatus::MigrationFailed),
                ("acme/c", RepositoryStatus::Pending),
                ("globex/d", RepositoryStatus::WontMigrate),
            ] {
                let repo = store
                    .upsert_repository(&Repository::discovered(name, SourcePlatform::Github))
                    .await
                    .unwrap();
                store.update_repository_status(repo.id, status).await.unwrap();
                if matches!(name, "acme/a" | "acme/b") {
                    store.set_repository_batch(repo.id, Some(batch.id)).await.unwrap();
                }
            }

            let all = store.status_counts(&RepositoryFilter::all()).await.unwrap();
            assert_eq!(all.get("complete"), 1);
            assert_eq!(all.get("wont_migrate"), 1);

            let in_batch = store
                .status_counts(&RepositoryFilter::for_batch(batch.id))
                .await
                .unwrap()
                .bucketed();
            assert_eq!(in_batch.total(), 2);
            assert_eq!(in_batch.failed, 1);

            let acme = store
                .list_repositories(&RepositoryFilter::for_organization("acme"))
                .await
                .unwrap();
            assert_eq!(acme.len(), 3);

            let fetched = store.get_batch(batch.id).await.unwrap().unwrap();
            assert_eq!(fetched.repository_count, 2);
            assert_eq!(fetched.status, BatchStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_completion_times_and_migrated_at() {
        for store in create_test_stores() {
            let repo = store
                .upsert_repository(&Repository::discovered("acme/a", SourcePlatform::Github))
                .await
                .unwrap();
            let updated = store
                .update_repository_status(repo.id, RepositoryStatus::Complete)
                .await
                .unwrap();
            assert!(updated.migrated_at.is_some());

            let times = store
                .completion_times(&RepositoryFilter::all(), Utc::now() - Duration::days(7))
                .await
                .unwrap();
            assert_eq!(times.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_history_is_append_only_and_cascade_delete() {
        for store in create_test_stores() {
            let repo = store
                .upsert_repository(&Repository::discovered("acme/a", SourcePlatform::Github))
                .await
                .unwrap();
            store
                .append_history(&MigrationHistory::entry(
                    repo.id,
                    RepositoryStatus::Pending,
                    RepositoryStatus::QueuedForMigration,
                    "transition",
                    None,
                ))
                .await
                .unwrap();
            store
                .append_history(&MigrationHistory::entry(
                    repo.id,
                    RepositoryStatus::QueuedForMigration,
                    RepositoryStatus::PreMigration,
                    "migration",
                    None,
                ))
                .await
                .unwrap();

            let history = store.list_history(repo.id).await.unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].to_status, RepositoryStatus::QueuedForMigration);

            let removed = store
                .delete_by_source(SourcePlatform::Github, "acme")
                .await
                .unwrap();
            assert_eq!(removed, 1);
            assert!(store.get_repository(repo.id).await.unwrap().is_none());
            assert!(store.list_history(repo.id).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_duplicate_batch_name() {
        for store in create_test_stores() {
            store.create_batch(&Batch::new("wave-1", None)).await.unwrap();
            let result = store.create_batch(&Batch::new("wave-1", None)).await;
            assert!(matches!(result, Err(StoreError::Duplicate { .. })));
        }
    }
}
