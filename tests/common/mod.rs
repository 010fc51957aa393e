//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ghmigrate::jobs::JobSupervisor;
use ghmigrate::lifecycle::{LifecycleCoordinator, SimulatedExecutor};
use ghmigrate::models::{
    Batch, DiscoveryProgress, MigrationHistory, ProgressStatus, Repository, SourcePlatform,
};
use ghmigrate::status::{RepositoryStatus, StatusCounts};
use ghmigrate::storage::{
    DataStore, MemoryDataStore, ProgressUpdate, RepositoryFilter, SharedDataStore, StoreResult,
};

pub const POLL: Duration = Duration::from_millis(10);

/// Fresh in-memory store
pub fn memory_store() -> SharedDataStore {
    Arc::new(MemoryDataStore::new())
}

/// Coordinator over a fresh store with its own supervisor
#[allow(dead_code)]
pub fn coordinator(executor: SimulatedExecutor) -> LifecycleCoordinator {
    let store = memory_store();
    let supervisor = JobSupervisor::spawn(store.clone());
    LifecycleCoordinator::new(store, supervisor, Arc::new(executor))
}

/// Insert discovered GitHub repositories `{org}/{name}` and return them
#[allow(dead_code)]
pub async fn seed_repositories(
    store: &SharedDataStore,
    org: &str,
    names: &[&str],
) -> Vec<Repository> {
    let mut repos = Vec::with_capacity(names.len());
    for name in names {
        let repo = Repository::discovered(format!("{org}/{name}"), SourcePlatform::Github);
        repos.push(store.upsert_repository(&repo).await.unwrap());
    }
    repos
}

/// Wait for a job to reach a final status, failing the test after 5s
#[allow(dead_code)]
pub async fn wait_final(supervisor: &JobSupervisor, progress_id: i64) -> DiscoveryProgress {
    tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.wait_for_completion(progress_id, POLL),
    )
    .await
    .expect("job did not finish in time")
    .unwrap()
}

/// Wait until the supervisor has dropped the job from its registry
#[allow(dead_code)]
pub async fn wait_deregistered(supervisor: &JobSupervisor, progress_id: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while supervisor.is_running(progress_id).await.unwrap() {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("job was not deregistered in time");
}

/// In-memory store that holds `finalize_progress` open after the record is
/// written, widening the window before the supervisor deregisters a job
#[allow(dead_code)]
pub struct SlowFinalizeStore {
    inner: MemoryDataStore,
    delay: Duration,
}

#[allow(dead_code)]
impl SlowFinalizeStore {
    pub fn shared(delay: Duration) -> SharedDataStore {
        Arc::new(Self {
            inner: MemoryDataStore::new(),
            delay,
        })
    }
}

#[async_trait]
impl DataStore for SlowFinalizeStore {
    async fn create_progress_if_none_active(
        &self,
        progress: &DiscoveryProgress,
    ) -> StoreResult<DiscoveryProgress> {
        self.inner.create_progress_if_none_active(progress).await
    }

    async fn get_progress(&self, id: i64) -> StoreResult<Option<DiscoveryProgress>> {
        self.inner.get_progress(id).await
    }

    async fn update_progress(&self, id: i64, update: &ProgressUpdate) -> StoreResult<()> {
        self.inner.update_progress(id, update).await
    }

    async fn finalize_progress(
        &self,
        id: i64,
        status: ProgressStatus,
        error_message: Option<&str>,
    ) -> StoreResult<bool> {
        let finalized = self.inner.finalize_progress(id, status, error_message).await;
        tokio::time::sleep(self.delay).await;
        finalized
    }

    async fn list_progress(&self, limit: usize) -> StoreResult<Vec<DiscoveryProgress>> {
        self.inner.list_progress(limit).await
    }

    async fn find_stale_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<DiscoveryProgress>> {
        self.inner.find_stale_progress(older_than).await
    }

    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<Repository> {
        self.inner.upsert_repository(repo).await
    }

    async fn get_repository(&self, id: i64) -> StoreResult<Option<Repository>> {
        self.inner.get_repository(id).await
    }

    async fn list_repositories(&self, filter: &RepositoryFilter) -> StoreResult<Vec<Repository>> {
        self.inner.list_repositories(filter).await
    }

    async fn update_repository_status(
        &self,
        id: i64,
        status: RepositoryStatus,
    ) -> StoreResult<Repository> {
        self.inner.update_repository_status(id, status).await
    }

    async fn set_repository_batch(&self, id: i64, batch_id: Option<i64>) -> StoreResult<()> {
        self.inner.set_repository_batch(id, batch_id).await
    }

    async fn status_counts(&self, filter: &RepositoryFilter) -> StoreResult<StatusCounts> {
        self.inner.status_counts(filter).await
    }

    async fn completion_times(
        &self,
        filter: &RepositoryFilter,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DateTime<Utc>>> {
        self.inner.completion_times(filter, since).await
    }

    async fn delete_by_source(
        &self,
        source: SourcePlatform,
        organization: &str,
    ) -> StoreResult<u64> {
        self.inner.delete_by_source(source, organization).await
    }

    async fn create_batch(&self, batch: &Batch) -> StoreResult<Batch> {
        self.inner.create_batch(batch).await
    }

    async fn get_batch(&self, id: i64) -> StoreResult<Option<Batch>> {
        self.inner.get_batch(id).await
    }

    async fn list_batches(&self) -> StoreResult<Vec<Batch>> {
        self.inner.list_batches().await
    }

    async fn update_batch(&self, batch: &Batch) -> StoreResult<()> {
        self.inner.update_batch(batch).await
    }

    async fn append_history(&self, entry: &MigrationHistory) -> StoreResult<()> {
        self.inner.append_history(entry).await
    }

    async fn list_history(&self, repository_id: i64) -> StoreResult<Vec<MigrationHistory>> {
        self.inner.list_history(repository_id).await
    }
}
