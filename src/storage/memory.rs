//! In-memory implementation of [`DataStore`] for tests and dry local runs

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::filter::RepositoryFilter;
use super::repository::{DataStore, ProgressUpdate};
use super::{StoreError, StoreResult};
use crate::models::{
    Batch, DiscoveryProgress, MigrationHistory, ProgressPhase, ProgressStatus, Repository,
    SourcePlatform,
};
use crate::status::{Bucket, RepositoryStatus, StatusCounts};

#[derive(Default)]
struct Tables {
    repositories: BTreeMap<i64, Repository>,
    batches: BTreeMap<i64, Batch>,
    history: Vec<MigrationHistory>,
    progress: BTreeMap<i64, DiscoveryProgress>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn with_count(&self, batch: &Batch) -> Batch {
        let mut batch = batch.clone();
        batch.repository_count = self
            .repositories
            .values()
            .filter(|r| r.batch_id == Some(batch.id))
            .count() as u64;
        batch
    }
}

/// Mutex-guarded maps; every method is one critical section
#[derive(Default)]
pub struct MemoryDataStore {
    tables: Mutex<Tables>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn create_progress_if_none_active(
        &self,
        progress: &DiscoveryProgress,
    ) -> StoreResult<DiscoveryProgress> {
        let mut tables = self.lock()?;

        if let Some(existing) = tables
            .progress
            .values()
            .find(|p| p.is_active() && p.scope_key == progress.scope_key)
        {
            return Err(StoreError::ActiveScope {
                scope_key: progress.scope_key.clone(),
                existing_id: existing.id,
            });
        }

        let mut record = progress.clone();
        record.id = tables.next_id();
        record.status = ProgressStatus::InProgress;
        record.completed_at = None;
        tables.progress.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_progress(&self, id: i64) -> StoreResult<Option<DiscoveryProgress>> {
        Ok(self.lock()?.progress.get(&id).cloned())
    }

    async fn update_progress(&self, id: i64, update: &ProgressUpdate) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let record = tables
            .progress
            .get_mut(&id)
            .ok_or(StoreError::not_found("progress", id))?;

        if !record.is_active() {
            return Ok(());
        }

        if let Some(phase) = update.phase {
            if record.phase != ProgressPhase::Cancelling {
                record.phase = phase;
            }
        }
        if let Some(v) = update.total_orgs {
            record.total_orgs = v;
        }
        if let Some(v) = update.processed_orgs {
            record.processed_orgs = v;
        }
        if let Some(v) = update.total_repos {
            record.total_repos = v;
        }
        if let Some(v) = update.processed_repos {
            record.processed_repos = v;
        }
        if let Some(v) = update.failed_repos {
            record.failed_repos = v;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn finalize_progress(
        &self,
        id: i64,
        status: ProgressStatus,
        error_message: Option<&str>,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let record = tables
            .progress
            .get_mut(&id)
            .ok_or(StoreError::not_found("progress", id))?;

        if !record.is_active() {
            return Ok(false);
        }

        let now = Utc::now();
        record.status = status;
        record.phase = ProgressPhase::Done;
        if let Some(message) = error_message {
            record.error_message = Some(message.to_string());
        }
        record.completed_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn list_progress(&self, limit: usize) -> StoreResult<Vec<DiscoveryProgress>> {
        Ok(self
            .lock()?
            .progress
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_stale_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<DiscoveryProgress>> {
        Ok(self
            .lock()?
            .progress
            .values()
            .filter(|p| p.is_active() && p.updated_at < older_than)
            .cloned()
            .collect())
    }

    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<Repository> {
        let mut tables = self.lock()?;
        let now = Utc::now();

        if let Some(existing) = tables
            .repositories
            .values_mut()
            .find(|r| r.full_name == repo.full_name)
        {
            existing.source = repo.source;
            existing.organization = repo.organization.clone();
            existing.total_size_bytes = repo.total_size_bytes;
            existing.has_lfs = repo.has_lfs;
            existing.has_submodules = repo.has_submodules;
            existing.has_actions = repo.has_actions;
            existing.has_wiki = repo.has_wiki;
            existing.complexity_score = repo.complexity_score;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let mut record = repo.clone();
        record.id = tables.next_id();
        record.updated_at = now;
        tables.repositories.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_repository(&self, id: i64) -> StoreResult<Option<Repository>> {
        Ok(self.lock()?.repositories.get(&id).cloned())
    }

    async fn list_repositories(&self, filter: &RepositoryFilter) -> StoreResult<Vec<Repository>> {
        Ok(self
            .lock()?
            .repositories
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn update_repository_status(
        &self,
        id: i64,
        status: RepositoryStatus,
    ) -> StoreResult<Repository> {
        let mut tables = self.lock()?;
        let repo = tables
            .repositories
            .get_mut(&id)
            .ok_or(StoreError::not_found("repository", id))?;

        let now = Utc::now();
        repo.status = status;
        repo.updated_at = now;
        if status.bucket() == Bucket::Completed {
            repo.migrated_at = Some(now);
        }
        Ok(repo.clone())
    }

    async fn set_repository_batch(&self, id: i64, batch_id: Option<i64>) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let repo = tables
            .repositories
            .get_mut(&id)
            .ok_or(StoreError::not_found("repository", id))?;
        repo.batch_id = batch_id;
        repo.updated_at = Utc::now();
        Ok(())
    }

    async fn status_counts(&self, filter: &RepositoryFilter) -> StoreResult<StatusCounts> {
        let tables = self.lock()?;
        let mut counts = StatusCounts::new();
        for repo in tables.repositories.values().filter(|r| filter.matches(r)) {
            counts.add(repo.status.as_str(), 1);
        }
        Ok(counts)
    }

    async fn completion_times(
        &self,
        filter: &RepositoryFilter,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DateTime<Utc>>> {
        let tables = self.lock()?;
        let mut times: Vec<_> = tables
            .repositories
            .values()
            .filter(|r| filter.matches(r) && r.status.bucket() == Bucket::Completed)
            .filter_map(|r| r.migrated_at)
            .filter(|t| *t >= since)
            .collect();
        times.sort();
        Ok(times)
    }

    async fn delete_by_source(
        &self,
        source: SourcePlatform,
        organization: &str,
    ) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let doomed: Vec<i64> = tables
            .repositories
            .values()
            .filter(|r| r.source == source && r.organization.eq_ignore_ascii_case(organization))
            .map(|r| r.id)
            .collect();

        for id in &doomed {
            tables.repositories.remove(id);
        }
        tables.history.retain(|h| !doomed.contains(&h.repository_id));
        Ok(doomed.len() as u64)
    }

    async fn create_batch(&self, batch: &Batch) -> StoreResult<Batch> {
        let mut tables = self.lock()?;
        if tables.batches.values().any(|b| b.name == batch.name) {
            return Err(StoreError::Duplicate {
                entity: "batch",
                key: batch.name.clone(),
            });
        }

        let mut record = batch.clone();
        record.id = tables.next_id();
        tables.batches.insert(record.id, record.clone());
        Ok(tables.with_count(&record))
    }

    async fn get_batch(&self, id: i64) -> StoreResult<Option<Batch>> {
        let tables = self.lock()?;
        Ok(tables.batches.get(&id).map(|b| tables.with_count(b)))
    }

    async fn list_batches(&self) -> StoreResult<Vec<Batch>> {
        let tables = self.lock()?;
        Ok(tables
            .batches
            .values()
            .map(|b| tables.with_count(b))
            .collect())
    }

    async fn update_batch(&self, batch: &Batch) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let stored = tables
            .batches
            .get_mut(&batch.id)
            .ok_or(StoreError::not_found("batch", batch.id))?;
        *stored = batch.clone();
        Ok(())
    }

    async fn append_history(&self, entry: &MigrationHistory) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let mut record = entry.clone();
        record.id = tables.next_id();
        tables.history.push(record);
        Ok(())
    }

    async fn list_history(&self, repository_id: i64) -> StoreResult<Vec<MigrationHistory>> {
        Ok(self
            .lock()?
            .history
            .iter()
            .filter(|h| h.repository_id == repository_id)
            .cloned()
            .collect())
    }
}
