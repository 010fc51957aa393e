// Core data structures for the migration engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::status::RepositoryStatus;

// ============================================================================
// Repository
// ============================================================================

/// Source platform a repository is migrated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePlatform {
    Github,
    AzureDevops,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::AzureDevops => "azure_devops",
        }
    }
}

impl FromStr for SourcePlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "azure_devops" | "azuredevops" | "ado" => Ok(Self::AzureDevops),
            other => Err(format!("Unknown source platform: {other}")),
        }
    }
}

/// One migratable repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub full_name: String, // owner/name
    pub source: SourcePlatform,
    pub organization: String,
    pub status: RepositoryStatus,
    pub batch_id: Option<i64>,
    pub total_size_bytes: u64,
    pub has_lfs: bool,
    pub has_submodules: bool,
    pub has_actions: bool,
    pub has_wiki: bool,
    pub complexity_score: u32,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub migrated_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// Build a freshly discovered repository. The id is assigned by the store.
    pub fn discovered(full_name: impl Into<String>, source: SourcePlatform) -> Self {
        let full_name = full_name.into();
        let organization = full_name
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let now = Utc::now();
        Self {
            id: 0,
            full_name,
            source,
            organization,
            status: RepositoryStatus::Pending,
            batch_id: None,
            total_size_bytes: 0,
            has_lfs: false,
            has_submodules: false,
            has_actions: false,
            has_wiki: false,
            complexity_score: 0,
            discovered_at: now,
            updated_at: now,
            migrated_at: None,
        }
    }

    /// Repository name without the owner prefix
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.full_name)
    }

    /// Derive a complexity score from source metadata.
    ///
    /// Size contributes up to 5 points (one per size tier), each feature
    /// flag adds a fixed weight.
    pub fn compute_complexity(&mut self) {
        const MB: u64 = 1024 * 1024;
        let size_points = match self.total_size_bytes {
            s if s < 100 * MB => 0,
            s if s < 1024 * MB => 1,
            s if s < 5 * 1024 * MB => 3,
            _ => 5,
        };
        let mut score = size_points;
        if self.has_lfs {
            score += 2;
        }
        if self.has_submodules {
            score += 2;
        }
        if self.has_actions {
            score += 1;
        }
        if self.has_wiki {
            score += 1;
        }
        self.complexity_score = score;
    }
}

// ============================================================================
// Batch
// ============================================================================

/// Roll-up status of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    CompletedWithErrors,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "ready" => Self::Ready,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "completed_with_errors" => Self::CompletedWithErrors,
            other => return Err(format!("Unknown batch status: {other}")),
        })
    }
}

/// A named group of repositories migrated together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: BatchStatus,
    pub repository_count: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_dry_run_at: Option<DateTime<Utc>>,
    pub last_migration_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description,
            status: BatchStatus::Pending,
            repository_count: 0,
            created_at: Utc::now(),
            started_at: None,
            last_dry_run_at: None,
            last_migration_attempt_at: None,
            completed_at: None,
        }
    }
}

// ============================================================================
// Migration History
// ============================================================================

/// One recorded status change of a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationHistory {
    pub id: i64,
    pub repository_id: i64,
    pub from_status: RepositoryStatus,
    pub to_status: RepositoryStatus,
    pub phase: String,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MigrationHistory {
    pub fn entry(
        repository_id: i64,
        from_status: RepositoryStatus,
        to_status: RepositoryStatus,
        phase: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            id: 0,
            repository_id,
            from_status,
            to_status,
            phase: phase.into(),
            message,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Job Scope
// ============================================================================

/// What a discovery run enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    Organization,
    Enterprise,
    Project,
}

impl DiscoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Enterprise => "enterprise",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for DiscoveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" | "org" => Ok(Self::Organization),
            "enterprise" => Ok(Self::Enterprise),
            "project" => Ok(Self::Project),
            other => Err(format!("Unknown discovery type: {other}")),
        }
    }
}

/// Kind of long-running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Discovery,
    DryRun,
    Migration,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::DryRun => "dry_run",
            Self::Migration => "migration",
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "dry_run" => Ok(Self::DryRun),
            "migration" => Ok(Self::Migration),
            other => Err(format!("Unknown job kind: {other}")),
        }
    }
}

/// The unit of work a job covers.
///
/// Two scopes with the same [`JobScope::scope_key`] may not run at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobScope {
    Discovery {
        discovery_type: DiscoveryType,
        target: String,
    },
    DryRun {
        batch_id: i64,
    },
    Migration {
        batch_id: i64,
    },
}

impl JobScope {
    pub fn discovery(discovery_type: DiscoveryType, target: impl Into<String>) -> Self {
        Self::Discovery {
            discovery_type,
            target: target.into(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::Discovery { .. } => JobKind::Discovery,
            Self::DryRun { .. } => JobKind::DryRun,
            Self::Migration { .. } => JobKind::Migration,
        }
    }

    pub fn discovery_type(&self) -> Option<DiscoveryType> {
        match self {
            Self::Discovery { discovery_type, .. } => Some(*discovery_type),
            _ => None,
        }
    }

    /// Human-readable target
    pub fn target(&self) -> String {
        match self {
            Self::Discovery { target, .. } => target.trim().to_string(),
            Self::DryRun { batch_id } | Self::Migration { batch_id } => format!("batch/{batch_id}"),
        }
    }

    /// Normalized key used for the one-active-job-per-scope rule.
    ///
    /// Dry-runs and migrations of the same batch share a key.
    pub fn scope_key(&self) -> String {
        match self {
            Self::Discovery {
                discovery_type,
                target,
            } => format!("discovery:{}:{}", discovery_type, target.trim().to_lowercase()),
            Self::DryRun { batch_id } | Self::Migration { batch_id } => format!("batch:{batch_id}"),
        }
    }

    /// Validate the target shape for discovery scopes
    pub fn validate(&self) -> Result<(), String> {
        let Self::Discovery {
            discovery_type,
            target,
        } = self
        else {
            return Ok(());
        };

        let target = target.trim();
        if target.is_empty() {
            return Err("target must not be empty".to_string());
        }

        let is_slug = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };

        match discovery_type {
            DiscoveryType::Organization | DiscoveryType::Enterprise => {
                if !is_slug(target) {
                    return Err(format!("invalid {discovery_type} name: {target}"));
                }
            }
            DiscoveryType::Project => {
                // organization/project; project names may contain spaces
                let Some((org, project)) = target.split_once('/') else {
                    return Err("project target must be 'organization/project'".to_string());
                };
                if !is_slug(org) || project.trim().is_empty() || project.contains('/') {
                    return Err(format!("invalid project target: {target}"));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Progress Record
// ============================================================================

/// Lifecycle status of a progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Complete,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_final(&self) -> bool {
        *self != Self::InProgress
    }
}

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "in_progress" => Self::InProgress,
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            other => return Err(format!("Unknown progress status: {other}")),
        })
    }
}

/// Finer-grained sub-state of a running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Initializing,
    ListingOrgs,
    ProcessingOrgs,
    ProcessingRepos,
    Migrating,
    Finalizing,
    Cancelling,
    Done,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ListingOrgs => "listing_orgs",
            Self::ProcessingOrgs => "processing_orgs",
            Self::ProcessingRepos => "processing_repos",
            Self::Migrating => "migrating",
            Self::Finalizing => "finalizing",
            Self::Cancelling => "cancelling",
            Self::Done => "done",
        }
    }
}

impl FromStr for ProgressPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "initializing" => Self::Initializing,
            "listing_orgs" => Self::ListingOrgs,
            "processing_orgs" => Self::ProcessingOrgs,
            "processing_repos" => Self::ProcessingRepos,
            "migrating" => Self::Migrating,
            "finalizing" => Self::Finalizing,
            "cancelling" => Self::Cancelling,
            "done" => Self::Done,
            other => return Err(format!("Unknown progress phase: {other}")),
        })
    }
}

/// Persisted record of one discovery / dry-run / migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryProgress {
    pub id: i64,
    pub job_kind: JobKind,
    pub discovery_type: Option<DiscoveryType>,
    pub target: String,
    pub scope_key: String,
    pub status: ProgressStatus,
    pub phase: ProgressPhase,
    pub total_orgs: u64,
    pub processed_orgs: u64,
    pub total_repos: u64,
    pub processed_repos: u64,
    pub failed_repos: u64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DiscoveryProgress {
    /// New in-progress record for a scope. The id is assigned by the store.
    pub fn start(scope: &JobScope) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            job_kind: scope.kind(),
            discovery_type: scope.discovery_type(),
            target: scope.target(),
            scope_key: scope.scope_key(),
            status: ProgressStatus::InProgress,
            phase: ProgressPhase::Initializing,
            total_orgs: 0,
            processed_orgs: 0,
            total_repos: 0,
            processed_repos: 0,
            failed_repos: 0,
            error_message: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProgressStatus::InProgress
    }

    /// Percentage of repositories processed, 0.0 when the total is unknown
    pub fn percent_complete(&self) -> f64 {
        if self.total_repos == 0 {
            return 0.0;
        }
        (self.processed_repos as f64 / self.total_repos as f64 * 100.0).min(100.0)
    }
}
