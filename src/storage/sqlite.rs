//! SQLite implementation of [`DataStore`]
//!
//! A single connection guarded by a `Mutex`. Every trait method holds the
//! lock for its whole body, so multi-statement operations are serialized
//! with respect to each other; the scope check in
//! `create_progress_if_none_active` additionally runs in an immediate
//! transaction and is backed by a partial unique index.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};

use super::filter::RepositoryFilter;
use super::repository::{DataStore, ProgressUpdate};
use super::{StoreError, StoreResult};
use crate::models::{
    Batch, DiscoveryProgress, MigrationHistory, ProgressStatus, Repository, SourcePlatform,
};
use crate::status::{Bucket, RepositoryStatus, StatusCounts};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS batches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        started_at TEXT,
        last_dry_run_at TEXT,
        last_migration_attempt_at TEXT,
        completed_at TEXT
    );

    CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        full_name TEXT NOT NULL UNIQUE,
        source TEXT NOT NULL,
        organization TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        batch_id INTEGER REFERENCES batches(id),
        total_size_bytes INTEGER NOT NULL DEFAULT 0,
        has_lfs INTEGER NOT NULL DEFAULT 0,
        has_submodules INTEGER NOT NULL DEFAULT 0,
        has_actions INTEGER NOT NULL DEFAULT 0,
        has_wiki INTEGER NOT NULL DEFAULT 0,
        complexity_score INTEGER NOT NULL DEFAULT 0,
        discovered_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        migrated_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_repositories_status ON repositories(status);
    CREATE INDEX IF NOT EXISTS idx_repositories_batch ON repositories(batch_id);
    CREATE INDEX IF NOT EXISTS idx_repositories_org ON repositories(organization);

    CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL,
        from_status TEXT NOT NULL,
        to_status TEXT NOT NULL,
        phase TEXT NOT NULL,
        message TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_repository ON migration_history(repository_id);

    CREATE TABLE IF NOT EXISTS discovery_progress (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_kind TEXT NOT NULL,
        discovery_type TEXT,
        target TEXT NOT NULL,
        scope_key TEXT NOT NULL,
        status TEXT NOT NULL,
        phase TEXT NOT NULL,
        total_orgs INTEGER NOT NULL DEFAULT 0,
        processed_orgs INTEGER NOT NULL DEFAULT 0,
        total_repos INTEGER NOT NULL DEFAULT 0,
        processed_repos INTEGER NOT NULL DEFAULT 0,
        failed_repos INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        started_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        completed_at TEXT
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_progress_active_scope
        ON discovery_progress(scope_key) WHERE status = 'in_progress';
"#;

const REPOSITORY_COLUMNS: &str = "id, full_name, source, organization, status, batch_id, \
     total_size_bytes, has_lfs, has_submodules, has_actions, has_wiki, complexity_score, \
     discovered_at, updated_at, migrated_at";

const PROGRESS_COLUMNS: &str = "id, job_kind, discovery_type, target, scope_key, status, phase, \
     total_orgs, processed_orgs, total_repos, processed_repos, failed_repos, error_message, \
     started_at, updated_at, completed_at";

const BATCH_COLUMNS: &str = "b.id, b.name, b.description, b.status, b.created_at, b.started_at, \
     b.last_dry_run_at, b.last_migration_attempt_at, b.completed_at, \
     (SELECT COUNT(*) FROM repositories r WHERE r.batch_id = b.id)";

/// SQLite-backed store
pub struct SqliteDataStore {
    conn: Mutex<Connection>,
}

impl SqliteDataStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> StoreResult<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn progress_exists(conn: &Connection, id: i64) -> StoreResult<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM discovery_progress WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    fn load_repository(conn: &Connection, id: i64) -> StoreResult<Option<Repository>> {
        let sql = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], repository_from_row).optional()?)
    }

    fn load_progress(conn: &Connection, id: i64) -> StoreResult<Option<DiscoveryProgress>> {
        let sql = format!("SELECT {PROGRESS_COLUMNS} FROM discovery_progress WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], progress_from_row).optional()?)
    }

    fn load_batch(conn: &Connection, id: i64) -> StoreResult<Option<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches b WHERE b.id = ?1");
        Ok(conn.query_row(&sql, params![id], batch_from_row).optional()?)
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn create_progress_if_none_active(
        &self,
        progress: &DiscoveryProgress,
    ) -> StoreResult<DiscoveryProgress> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM discovery_progress
                 WHERE scope_key = ?1 AND status = 'in_progress' LIMIT 1",
                params![progress.scope_key],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_id) = existing {
            return Err(StoreError::ActiveScope {
                scope_key: progress.scope_key.clone(),
                existing_id,
            });
        }

        let inserted = tx.execute(
            r#"
                INSERT INTO discovery_progress (
                    job_kind, discovery_type, target, scope_key, status, phase,
                    total_orgs, processed_orgs, total_repos, processed_repos, failed_repos,
                    error_message, started_at, updated_at, completed_at
                ) VALUES (?1, ?2, ?3, ?4, 'in_progress', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL)
                "#,
            params![
                progress.job_kind.as_str(),
                progress.discovery_type.map(|t| t.as_str()),
                progress.target,
                progress.scope_key,
                progress.phase.as_str(),
                progress.total_orgs as i64,
                progress.processed_orgs as i64,
                progress.total_repos as i64,
                progress.processed_repos as i64,
                progress.failed_repos as i64,
                progress.error_message,
                ts(&progress.started_at),
                ts(&progress.updated_at),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::ActiveScope {
                    scope_key: progress.scope_key.clone(),
                    existing_id: 0,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;

        Self::load_progress(&conn, id)?.ok_or(StoreError::not_found("progress", id))
    }

    async fn get_progress(&self, id: i64) -> StoreResult<Option<DiscoveryProgress>> {
        let conn = self.lock()?;
        Self::load_progress(&conn, id)
    }

    async fn update_progress(&self, id: i64, update: &ProgressUpdate) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
                UPDATE discovery_progress SET
                    phase = CASE WHEN phase = 'cancelling' THEN phase ELSE COALESCE(?1, phase) END,
                    total_orgs = COALESCE(?2, total_orgs),
                    processed_orgs = COALESCE(?3, processed_orgs),
                    total_repos = COALESCE(?4, total_repos),
                    processed_repos = COALESCE(?5, processed_repos),
                    failed_repos = COALESCE(?6, failed_repos),
                    updated_at = ?7
                WHERE id = ?8 AND status = 'in_progress'
                "#,
            params![
                update.phase.map(|p| p.as_str()),
                update.total_orgs.map(|v| v as i64),
                update.processed_orgs.map(|v| v as i64),
                update.total_repos.map(|v| v as i64),
                update.processed_repos.map(|v| v as i64),
                update.failed_repos.map(|v| v as i64),
                ts(&Utc::now()),
                id,
            ],
        )?;

        if changed == 0 && !Self::progress_exists(&conn, id)? {
            return Err(StoreError::not_found("progress", id));
        }
        Ok(())
    }

    async fn finalize_progress(
        &self,
        id: i64,
        status: ProgressStatus,
        error_message: Option<&str>,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let now = ts(&Utc::now());
        let changed = conn.execute(
            r#"
                UPDATE discovery_progress SET
                    status = ?1,
                    phase = 'done',
                    error_message = COALESCE(?2, error_message),
                    completed_at = ?3,
                    updated_at = ?3
                WHERE id = ?4 AND status = 'in_progress'
                "#,
            params![status.as_str(), error_message, now, id],
        )?;

        if changed == 0 && !Self::progress_exists(&conn, id)? {
            return Err(StoreError::not_found("progress", id));
        }
        Ok(changed > 0)
    }

    async fn list_progress(&self, limit: usize) -> StoreResult<Vec<DiscoveryProgress>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM discovery_progress ORDER BY id DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], progress_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn find_stale_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> StoreResult<Vec<DiscoveryProgress>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM discovery_progress
             WHERE status = 'in_progress' AND updated_at < ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ts(&older_than)], progress_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<Repository> {
        let conn = self.lock()?;
        conn.execute(
            r#"
                INSERT INTO repositories (
                    full_name, source, organization, status, batch_id, total_size_bytes,
                    has_lfs, has_submodules, has_actions, has_wiki, complexity_score,
                    discovered_at, updated_at, migrated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(full_name) DO UPDATE SET
                    source = excluded.source,
                    organization = excluded.organization,
                    total_size_bytes = excluded.total_size_bytes,
                    has_lfs = excluded.has_lfs,
                    has_submodules = excluded.has_submodules,
                    has_actions = excluded.has_actions,
                    has_wiki = excluded.has_wiki,
                    complexity_score = excluded.complexity_score,
                    updated_at = excluded.updated_at
                "#,
            params![
                repo.full_name,
                repo.source.as_str(),
                repo.organization,
                repo.status.as_str(),
                repo.batch_id,
                repo.total_size_bytes as i64,
                repo.has_lfs,
                repo.has_submodules,
                repo.has_actions,
                repo.has_wiki,
                repo.complexity_score,
                ts(&repo.discovered_at),
                ts(&Utc::now()),
                repo.migrated_at.as_ref().map(ts),
            ],
        )?;

        let sql = format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE full_name = ?1");
        Ok(conn.query_row(&sql, params![repo.full_name], repository_from_row)?)
    }

    async fn get_repository(&self, id: i64) -> StoreResult<Option<Repository>> {
        let conn = self.lock()?;
        Self::load_repository(&conn, id)
    }

    async fn list_repositories(&self, filter: &RepositoryFilter) -> StoreResult<Vec<Repository>> {
        let conn = self.lock()?;
        let query = filter.to_query();
        let sql = format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE {} ORDER BY id",
            query.where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(query.params.iter()), repository_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn update_repository_status(
        &self,
        id: i64,
        status: RepositoryStatus,
    ) -> StoreResult<Repository> {
        let conn = self.lock()?;
        let now = Utc::now();
        let migrated_at = (status.bucket() == Bucket::Completed).then(|| ts(&now));

        let changed = conn.execute(
            "UPDATE repositories SET status = ?1, updated_at = ?2,
                 migrated_at = COALESCE(?3, migrated_at)
             WHERE id = ?4",
            params![status.as_str(), ts(&now), migrated_at, id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("repository", id));
        }

        Self::load_repository(&conn, id)?.ok_or(StoreError::not_found("repository", id))
    }

    async fn set_repository_batch(&self, id: i64, batch_id: Option<i64>) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE repositories SET batch_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![batch_id, ts(&Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("repository", id));
        }
        Ok(())
    }

    async fn status_counts(&self, filter: &RepositoryFilter) -> StoreResult<StatusCounts> {
        let conn = self.lock()?;
        let query = filter.to_query();
        let sql = format!(
            "SELECT status, COUNT(*) FROM repositories WHERE {} GROUP BY status",
            query.where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let counts = stmt
            .query_map(params_from_iter(query.params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<StatusCounts, _>>()?;
        Ok(counts)
    }

    async fn completion_times(
        &self,
        filter: &RepositoryFilter,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<DateTime<Utc>>> {
        let conn = self.lock()?;
        let query = filter.to_query();
        let sql = format!(
            "SELECT migrated_at FROM repositories
             WHERE {} AND status IN ('complete', 'migration_complete')
               AND migrated_at IS NOT NULL AND migrated_at >= ?
             ORDER BY migrated_at",
            query.where_clause
        );
        let mut params = query.params;
        params.push(rusqlite::types::Value::Text(ts(&since)));

        let mut stmt = conn.prepare(&sql)?;
        let times = stmt
            .query_map(params_from_iter(params.iter()), |row| ts_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(times)
    }

    async fn delete_by_source(
        &self,
        source: SourcePlatform,
        organization: &str,
    ) -> StoreResult<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM migration_history WHERE repository_id IN (
                 SELECT id FROM repositories
                 WHERE source = ?1 AND LOWER(organization) = LOWER(?2))",
            params![source.as_str(), organization],
        )?;
        let removed = tx.execute(
            "DELETE FROM repositories WHERE source = ?1 AND LOWER(organization) = LOWER(?2)",
            params![source.as_str(), organization],
        )?;
        tx.commit()?;

        tracing::info!(
            source = source.as_str(),
            organization = organization,
            removed = removed,
            "Deleted repositories for source organization"
        );
        Ok(removed as u64)
    }

    async fn create_batch(&self, batch: &Batch) -> StoreResult<Batch> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"
                INSERT INTO batches (
                    name, description, status, created_at, started_at, last_dry_run_at,
                    last_migration_attempt_at, completed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            params![
                batch.name,
                batch.description,
                batch.status.as_str(),
                ts(&batch.created_at),
                batch.started_at.as_ref().map(ts),
                batch.last_dry_run_at.as_ref().map(ts),
                batch.last_migration_attempt_at.as_ref().map(ts),
                batch.completed_at.as_ref().map(ts),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::Duplicate {
                    entity: "batch",
                    key: batch.name.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        Self::load_batch(&conn, id)?.ok_or(StoreError::not_found("batch", id))
    }

    async fn get_batch(&self, id: i64) -> StoreResult<Option<Batch>> {
        let conn = self.lock()?;
        Self::load_batch(&conn, id)
    }

    async fn list_batches(&self) -> StoreResult<Vec<Batch>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches b ORDER BY b.id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], batch_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn update_batch(&self, batch: &Batch) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
                UPDATE batches SET
                    name = ?1, description = ?2, status = ?3, started_at = ?4,
                    last_dry_run_at = ?5, last_migration_attempt_at = ?6, completed_at = ?7
                WHERE id = ?8
                "#,
            params![
                batch.name,
                batch.description,
                batch.status.as_str(),
                batch.started_at.as_ref().map(ts),
                batch.last_dry_run_at.as_ref().map(ts),
                batch.last_migration_attempt_at.as_ref().map(ts),
                batch.completed_at.as_ref().map(ts),
                batch.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("batch", batch.id));
        }
        Ok(())
    }

    async fn append_history(&self, entry: &MigrationHistory) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
                INSERT INTO migration_history (
                    repository_id, from_status, to_status, phase, message, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            params![
                entry.repository_id,
                entry.from_status.as_str(),
                entry.to_status.as_str(),
                entry.phase,
                entry.message,
                ts(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_history(&self, repository_id: i64) -> StoreResult<Vec<MigrationHistory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, repository_id, from_status, to_status, phase, message, created_at
             FROM migration_history WHERE repository_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![repository_id], |row| {
                Ok(MigrationHistory {
                    id: row.get(0)?,
                    repository_id: row.get(1)?,
                    from_status: parsed_col(row, 2)?,
                    to_status: parsed_col(row, 3)?,
                    phase: row.get(4)?,
                    message: row.get(5)?,
                    created_at: ts_col(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

/// Fixed-width RFC 3339 so timestamps compare correctly as text
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => ts_col(row, idx).map(Some),
        None => Ok(None),
    }
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        full_name: row.get(1)?,
        source: parsed_col(row, 2)?,
        organization: row.get(3)?,
        status: parsed_col(row, 4)?,
        batch_id: row.get(5)?,
        total_size_bytes: row.get::<_, i64>(6)? as u64,
        has_lfs: row.get(7)?,
        has_submodules: row.get(8)?,
        has_actions: row.get(9)?,
        has_wiki: row.get(10)?,
        complexity_score: row.get(11)?,
        discovered_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
        migrated_at: opt_ts_col(row, 14)?,
    })
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<DiscoveryProgress> {
    let discovery_type = match row.get::<_, Option<String>>(2)? {
        Some(raw) => Some(raw.parse().map_err(|e: String| conversion_error(2, e))?),
        None => None,
    };

    Ok(DiscoveryProgress {
        id: row.get(0)?,
        job_kind: parsed_col(row, 1)?,
        discovery_type,
        target: row.get(3)?,
        scope_key: row.get(4)?,
        status: parsed_col(row, 5)?,
        phase: parsed_col(row, 6)?,
        total_orgs: row.get::<_, i64>(7)? as u64,
        processed_orgs: row.get::<_, i64>(8)? as u64,
        total_repos: row.get::<_, i64>(9)? as u64,
        processed_repos: row.get::<_, i64>(10)? as u64,
        failed_repos: row.get::<_, i64>(11)? as u64,
        error_message: row.get(12)?,
        started_at: ts_col(row, 13)?,
        updated_at: ts_col(row, 14)?,
        completed_at: opt_ts_col(row, 15)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        status: parsed_col(row, 3)?,
        created_at: ts_col(row, 4)?,
        started_at: opt_ts_col(row, 5)?,
        last_dry_run_at: opt_ts_col(row, 6)?,
        last_migration_attempt_at: opt_ts_col(row, 7)?,
        completed_at: opt_ts_col(row, 8)?,
        repository_count: row.get::<_, i64>(9)? as u64,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveryType, JobScope};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("migrations.db");

        let id = {
            let store = SqliteDataStore::new(&path).unwrap();
            let scope = JobScope::discovery(DiscoveryType::Enterprise, "acme-ent");
            store
                .create_progress_if_none_active(&DiscoveryProgress::start(&scope))
                .await
                .unwrap()
                .id
        };

        let reopened = SqliteDataStore::new(&path).unwrap();
        let progress = reopened.get_progress(id).await.unwrap().unwrap();
        assert_eq!(progress.discovery_type, Some(DiscoveryType::Enterprise));
        assert_eq!(progress.status, ProgressStatus::InProgress);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(ts(&early) < ts(&late));
        assert_eq!(ts(&early).len(), ts(&late).len());
    }
}
