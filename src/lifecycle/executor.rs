//! Destination-side migration steps
//!
//! The engine never talks to the destination platform directly; batch jobs
//! drive a [`MigrationExecutor`]. [`SimulatedExecutor`] completes every step
//! locally and can be told to fail specific repositories.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Repository;
use crate::status::RepositoryStatus;

/// Errors from a migration step
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// The step failed for this repository
    #[error("{0}")]
    Failed(String),

    /// Destination unavailable; the step may succeed later
    #[error("Destination unavailable: {0}")]
    Unavailable(String),
}

impl ExecutorError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Ordered steps of a production migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationPhase {
    PreMigration,
    ArchiveGeneration,
    ContentMigration,
    PostMigration,
}

impl MigrationPhase {
    pub const ORDER: [MigrationPhase; 4] = [
        Self::PreMigration,
        Self::ArchiveGeneration,
        Self::ContentMigration,
        Self::PostMigration,
    ];

    /// Repository status while this step runs
    pub fn status(&self) -> RepositoryStatus {
        match self {
            Self::PreMigration => RepositoryStatus::PreMigration,
            Self::ArchiveGeneration => RepositoryStatus::ArchiveGenerating,
            Self::ContentMigration => RepositoryStatus::MigratingContent,
            Self::PostMigration => RepositoryStatus::PostMigration,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreMigration => "pre_migration",
            Self::ArchiveGeneration => "archive_generation",
            Self::ContentMigration => "content_migration",
            Self::PostMigration => "post_migration",
        }
    }
}

/// Performs dry-runs and migration steps against the destination
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Validate that the repository can be migrated without changing anything
    async fn dry_run(&self, repo: &Repository) -> Result<(), ExecutorError>;

    /// Run one step of a production migration
    async fn run_phase(&self, repo: &Repository, phase: MigrationPhase)
        -> Result<(), ExecutorError>;
}

/// Executor that succeeds locally unless told otherwise
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    step_delay: Duration,
    failing_dry_runs: HashSet<String>,
    failing_migrations: HashSet<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every step
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn failing_dry_run(mut self, full_name: impl Into<String>) -> Self {
        self.failing_dry_runs.insert(full_name.into());
        self
    }

    pub fn failing_migration(mut self, full_name: impl Into<String>) -> Self {
        self.failing_migrations.insert(full_name.into());
        self
    }

    /// Log of executed steps as `"{step}:{full_name}"`
    pub fn calls(&self) -> Vec<String> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, step: &str, repo: &Repository) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{step}:{}", repo.full_name));
        }
    }

    async fn pause(&self) {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }
}

#[async_trait]
impl MigrationExecutor for SimulatedExecutor {
    async fn dry_run(&self, repo: &Repository) -> Result<(), ExecutorError> {
        self.record("dry_run", repo);
        self.pause().await;

        if self.failing_dry_runs.contains(&repo.full_name) {
            return Err(ExecutorError::Failed(format!(
                "dry-run rejected for {}",
                repo.full_name
            )));
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        repo: &Repository,
        phase: MigrationPhase,
    ) -> Result<(), ExecutorError> {
        self.record(phase.as_str(), repo);
        self.pause().await;

        if phase == MigrationPhase::ContentMigration
            && self.failing_migrations.contains(&repo.full_name)
        {
            return Err(ExecutorError::Failed(format!(
                "content migration failed for {}",
                repo.full_name
            )));
        }
        Ok(())
    }
}
