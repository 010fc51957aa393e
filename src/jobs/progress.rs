//! Incremental progress reporting for running jobs
//!
//! The tracker keeps counters locally and writes absolute values through
//! the store, so a lost write is corrected by the next one.

use std::sync::{Arc, Mutex};

use crate::jobs::{JobError, JobResult};
use crate::models::ProgressPhase;
use crate::storage::{ProgressUpdate, SharedDataStore};

/// Counter snapshot held by a [`ProgressTracker`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    pub total_orgs: u64,
    pub processed_orgs: u64,
    pub total_repos: u64,
    pub processed_repos: u64,
    pub failed_repos: u64,
}

impl ProgressCounters {
    fn as_update(&self, phase: Option<ProgressPhase>) -> ProgressUpdate {
        ProgressUpdate {
            phase,
            total_orgs: Some(self.total_orgs),
            processed_orgs: Some(self.processed_orgs),
            total_repos: Some(self.total_repos),
            processed_repos: Some(self.processed_repos),
            failed_repos: Some(self.failed_repos),
        }
    }
}

/// Write-through handle a job body uses to report progress
#[derive(Clone)]
pub struct ProgressTracker {
    progress_id: i64,
    store: SharedDataStore,
    counters: Arc<Mutex<ProgressCounters>>,
}

impl ProgressTracker {
    pub fn new(progress_id: i64, store: SharedDataStore) -> Self {
        Self {
            progress_id,
            store,
            counters: Arc::new(Mutex::new(ProgressCounters::default())),
        }
    }

    pub fn progress_id(&self) -> i64 {
        self.progress_id
    }

    /// Current counter values
    pub fn snapshot(&self) -> ProgressCounters {
        match self.counters.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub async fn set_phase(&self, phase: ProgressPhase) -> JobResult<()> {
        self.write(ProgressUpdate::phase(phase)).await
    }

    pub async fn set_total_orgs(&self, total: u64) -> JobResult<()> {
        self.mutate(|c| c.total_orgs = total).await
    }

    pub async fn inc_processed_orgs(&self) -> JobResult<()> {
        self.mutate(|c| c.processed_orgs += 1).await
    }

    /// Grow the repository total as listings arrive
    pub async fn add_repos(&self, count: u64) -> JobResult<()> {
        self.mutate(|c| c.total_repos += count).await
    }

    pub async fn inc_processed_repos(&self) -> JobResult<()> {
        self.mutate(|c| c.processed_repos += 1).await
    }

    /// A failed repository also counts as processed
    pub async fn inc_failed_repos(&self) -> JobResult<()> {
        self.mutate(|c| {
            c.failed_repos += 1;
            c.processed_repos += 1;
        })
        .await
    }

    async fn mutate(&self, f: impl FnOnce(&mut ProgressCounters)) -> JobResult<()> {
        let update = {
            let mut guard = self
                .counters
                .lock()
                .map_err(|_| JobError::internal("progress counters poisoned"))?;
            f(&mut *guard);
            guard.as_update(None)
        };
        self.write(update).await
    }

    async fn write(&self, update: ProgressUpdate) -> JobResult<()> {
        self.store
            .update_progress(self.progress_id, &update)
            .await
            .map_err(|e| {
                tracing::warn!(
                    progress_id = self.progress_id,
                    phase = ?update.phase,
                    error = %e,
                    "Failed to persist job progress"
                );
                JobError::transient(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveryProgress, DiscoveryType, JobScope};
    use crate::storage::{DataStore, MemoryDataStore};

    async fn tracker() -> (ProgressTracker, SharedDataStore) {
        let store: SharedDataStore = Arc::new(MemoryDataStore::new());
        let scope = JobScope::discovery(DiscoveryType::Organization, "acme");
        let progress = store
            .create_progress_if_none_active(&DiscoveryProgress::start(&scope))
            .await
            .unwrap();
        (ProgressTracker::new(progress.id, store.clone()), store)
    }

    #[tokio::test]
    async fn test_counters_written_through() {
        let (tracker, store) = tracker().await;

        tracker.set_phase(ProgressPhase::ProcessingRepos).await.unwrap();
        tracker.add_repos(3).await.unwrap();
        tracker.inc_processed_repos().await.unwrap();
        tracker.inc_failed_repos().await.unwrap();

        let stored = store
            .get_progress(tracker.progress_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.phase, ProgressPhase::ProcessingRepos);
        assert_eq!(stored.total_repos, 3);
        assert_eq!(stored.processed_repos, 2);
        assert_eq!(stored.failed_repos, 1);
        assert_eq!(tracker.snapshot().processed_repos, 2);
    }

    #[tokio::test]
    async fn test_missing_record_is_transient() {
        let store: SharedDataStore = Arc::new(MemoryDataStore::new());
        let tracker = ProgressTracker::new(99, store);
        let result = tracker.inc_processed_orgs().await;
        assert!(matches!(result, Err(JobError::Transient(_))));
    }
}
