//! Repository status model
//!
//! Granular migration statuses, the coarse progress buckets they roll up
//! into, and the table of legal transitions between them.
//!
//! # Buckets
//!
//! ```text
//! pending      pending, dry_run_queued, dry_run_in_progress, dry_run_complete
//! in_progress  pre_migration, archive_generating, queued_for_migration,
//!              migrating_content, post_migration
//! completed    complete, migration_complete
//! failed       migration_failed, dry_run_failed, rolled_back
//! excluded     wont_migrate
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Repository Status
// ============================================================================

/// Granular status of a single repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Pending,
    DryRunQueued,
    DryRunInProgress,
    DryRunComplete,
    DryRunFailed,
    PreMigration,
    ArchiveGenerating,
    QueuedForMigration,
    MigratingContent,
    PostMigration,
    Complete,
    MigrationComplete,
    MigrationFailed,
    RolledBack,
    WontMigrate,
}

impl RepositoryStatus {
    /// Every status, in declaration order
    pub const ALL: [RepositoryStatus; 15] = [
        Self::Pending,
        Self::DryRunQueued,
        Self::DryRunInProgress,
        Self::DryRunComplete,
        Self::DryRunFailed,
        Self::PreMigration,
        Self::ArchiveGenerating,
        Self::QueuedForMigration,
        Self::MigratingContent,
        Self::PostMigration,
        Self::Complete,
        Self::MigrationComplete,
        Self::MigrationFailed,
        Self::RolledBack,
        Self::WontMigrate,
    ];

    /// Convert to the persisted string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DryRunQueued => "dry_run_queued",
            Self::DryRunInProgress => "dry_run_in_progress",
            Self::DryRunComplete => "dry_run_complete",
            Self::DryRunFailed => "dry_run_failed",
            Self::PreMigration => "pre_migration",
            Self::ArchiveGenerating => "archive_generating",
            Self::QueuedForMigration => "queued_for_migration",
            Self::MigratingContent => "migrating_content",
            Self::PostMigration => "post_migration",
            Self::Complete => "complete",
            Self::MigrationComplete => "migration_complete",
            Self::MigrationFailed => "migration_failed",
            Self::RolledBack => "rolled_back",
            Self::WontMigrate => "wont_migrate",
        }
    }

    /// Coarse progress bucket for this status
    pub fn bucket(&self) -> Bucket {
        match self {
            Self::Pending | Self::DryRunQueued | Self::DryRunInProgress | Self::DryRunComplete => {
                Bucket::Pending
            }
            Self::PreMigration
            | Self::ArchiveGenerating
            | Self::QueuedForMigration
            | Self::MigratingContent
            | Self::PostMigration => Bucket::InProgress,
            Self::Complete | Self::MigrationComplete => Bucket::Completed,
            Self::MigrationFailed | Self::DryRunFailed | Self::RolledBack => Bucket::Failed,
            Self::WontMigrate => Bucket::Excluded,
        }
    }

    /// Whether the repository has reached the end of a migration attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self.bucket(), Bucket::Completed | Bucket::Failed)
    }

    /// Whether work is currently scheduled or running for this repository
    pub fn is_active(&self) -> bool {
        self.bucket() == Bucket::InProgress
            || matches!(self, Self::DryRunQueued | Self::DryRunInProgress)
    }

    /// Statuses reachable through the normal lifecycle path.
    ///
    /// Excludes the administrative edges (`wont_migrate`, rollback), which
    /// have dedicated operations.
    pub fn next_statuses(&self) -> &'static [RepositoryStatus] {
        use RepositoryStatus::*;
        match self {
            Pending => &[DryRunQueued, QueuedForMigration],
            DryRunQueued => &[DryRunInProgress, Pending],
            DryRunInProgress => &[DryRunComplete, DryRunFailed],
            DryRunComplete => &[DryRunQueued, QueuedForMigration],
            DryRunFailed => &[DryRunQueued, Pending],
            QueuedForMigration => &[PreMigration, Pending],
            PreMigration => &[ArchiveGenerating, MigrationFailed],
            ArchiveGenerating => &[MigratingContent, MigrationFailed],
            MigratingContent => &[PostMigration, MigrationFailed],
            PostMigration => &[Complete, MigrationComplete, MigrationFailed],
            MigrationFailed => &[QueuedForMigration, DryRunQueued],
            RolledBack => &[Pending, DryRunQueued, QueuedForMigration],
            Complete | MigrationComplete | WontMigrate => &[],
        }
    }

    /// Check a lifecycle transition against the transition table
    pub fn can_transition_to(&self, to: RepositoryStatus) -> bool {
        self.next_statuses().contains(&to)
    }

    /// Whether an explicit rollback is allowed from this status
    pub fn can_roll_back(&self) -> bool {
        matches!(self.bucket(), Bucket::Completed | Bucket::Failed) && *self != Self::RolledBack
    }
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a raw string is not a known status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown repository status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RepositoryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// Buckets
// ============================================================================

/// Coarse progress category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Pending,
    InProgress,
    Completed,
    Failed,
    Excluded,
}

/// Bucket a raw status string.
///
/// Unrecognized values count as pending so that an unexpected status never
/// hides a failure or inflates completions.
pub fn bucket_for_raw(raw: &str) -> Bucket {
    match raw.parse::<RepositoryStatus>() {
        Ok(status) => status.bucket(),
        Err(_) => {
            tracing::debug!(status = raw, "Unrecognized status bucketed as pending");
            Bucket::Pending
        }
    }
}

// ============================================================================
// Status Counts
// ============================================================================

/// Snapshot of repository counts keyed by raw status string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    counts: BTreeMap<String, u64>,
}

impl StatusCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` repositories with the given raw status
    pub fn add(&mut self, status: impl Into<String>, count: u64) {
        *self.counts.entry(status.into()).or_insert(0) += count;
    }

    /// Count for one raw status
    pub fn get(&self, status: &str) -> u64 {
        self.counts.get(status).copied().unwrap_or(0)
    }

    /// Iterate raw `(status, count)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Roll the snapshot up into buckets
    pub fn bucketed(&self) -> BucketCounts {
        let mut buckets = BucketCounts::default();
        for (status, count) in self.iter() {
            match bucket_for_raw(status) {
                Bucket::Pending => buckets.pending += count,
                Bucket::InProgress => buckets.in_progress += count,
                Bucket::Completed => buckets.completed += count,
                Bucket::Failed => buckets.failed += count,
                Bucket::Excluded => buckets.excluded += count,
            }
        }
        buckets
    }
}

impl FromIterator<(String, u64)> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut counts = Self::new();
        for (status, count) in iter {
            counts.add(status, count);
        }
        counts
    }
}

/// Per-bucket totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub excluded: u64,
}

impl BucketCounts {
    /// Total repositories counted toward progress (excluded bucket removed)
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.completed + self.failed
    }

    /// Repositories still to be migrated
    pub fn remaining(&self) -> u64 {
        self.pending + self.in_progress
    }
}

// ============================================================================
// Tests
// ============================================================================
