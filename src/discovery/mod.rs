//! Repository discovery
//!
//! A discovery job enumerates repositories from a source platform and
//! upserts them into the store. Phases:
//!
//! ```text
//! enterprise:    listing_orgs → processing_orgs → finalizing
//! organization:  processing_repos → finalizing
//! project:       processing_repos → finalizing
//! ```
//!
//! Re-discovering a repository refreshes its metadata; status and batch
//! membership are left alone.

pub mod github;
pub mod source;

use std::sync::Arc;

use tracing::{info, warn};

pub use github::GitHubClient;
pub use source::{SourceClient, SourceError, SourceRepository, StaticSource};

use crate::jobs::{JobContext, JobError, JobResult, JobSupervisor};
use crate::models::{DiscoveryProgress, DiscoveryType, JobScope, ProgressPhase};

/// Starts discovery jobs against one source client
#[derive(Clone)]
pub struct DiscoveryService {
    supervisor: JobSupervisor,
    source: Arc<dyn SourceClient>,
}

impl DiscoveryService {
    pub fn new(supervisor: JobSupervisor, source: Arc<dyn SourceClient>) -> Self {
        Self { supervisor, source }
    }

    pub fn supervisor(&self) -> &JobSupervisor {
        &self.supervisor
    }

    /// Launch a discovery job and return its progress id.
    ///
    /// `Conflict` when a discovery of the same target is already running.
    pub async fn start_discovery(
        &self,
        discovery_type: DiscoveryType,
        target: &str,
    ) -> JobResult<i64> {
        let scope = JobScope::discovery(discovery_type, target.trim());
        let source = Arc::clone(&self.source);
        let progress_id = self
            .supervisor
            .start(scope, move |ctx| run_discovery(ctx, source))
            .await?;

        info!(
            progress_id = progress_id,
            discovery_type = %discovery_type,
            target = target.trim(),
            "Discovery started"
        );
        Ok(progress_id)
    }

    /// Same as [`start_discovery`](Self::start_discovery) with an unparsed type
    pub async fn start_discovery_raw(&self, discovery_type: &str, target: &str) -> JobResult<i64> {
        let discovery_type = discovery_type
            .trim()
            .to_lowercase()
            .parse::<DiscoveryType>()
            .map_err(JobError::Validation)?;
        self.start_discovery(discovery_type, target).await
    }

    pub async fn get_progress(&self, progress_id: i64) -> JobResult<DiscoveryProgress> {
        self.supervisor.get_progress(progress_id).await
    }

    pub async fn cancel(&self, progress_id: i64) -> JobResult<()> {
        self.supervisor.cancel(progress_id).await
    }
}

/// Job body for a discovery scope
pub async fn run_discovery(ctx: JobContext, source: Arc<dyn SourceClient>) -> JobResult<()> {
    let JobScope::Discovery {
        discovery_type,
        target,
    } = ctx.scope.clone()
    else {
        return Err(JobError::internal("discovery job started with a batch scope"));
    };
    let target = target.trim().to_string();

    match discovery_type {
        DiscoveryType::Enterprise => discover_enterprise(&ctx, source.as_ref(), &target).await?,
        DiscoveryType::Organization => {
            ctx.progress.set_total_orgs(1).await?;
            ctx.progress.set_phase(ProgressPhase::ProcessingRepos).await?;
            discover_organization(&ctx, source.as_ref(), &target).await?;
            ctx.progress.inc_processed_orgs().await?;
        }
        DiscoveryType::Project => {
            let (organization, project) = target
                .split_once('/')
                .ok_or_else(|| JobError::Validation(format!("invalid project target: {target}")))?;
            ctx.progress.set_total_orgs(1).await?;
            ctx.progress.set_phase(ProgressPhase::ProcessingRepos).await?;
            let repos = ctx
                .until_cancelled(source.list_project_repositories(organization, project.trim()))
                .await??;
            store_repositories(&ctx, repos).await?;
            ctx.progress.inc_processed_orgs().await?;
        }
    }

    ctx.progress.set_phase(ProgressPhase::Finalizing).await?;
    let counters = ctx.progress.snapshot();
    info!(
        progress_id = ctx.progress_id,
        target = %target,
        repositories = counters.processed_repos,
        failed = counters.failed_repos,
        "Discovery finished"
    );
    Ok(())
}

/// Process every organization of an enterprise.
///
/// A failing organization is logged and skipped; the job fails only when
/// every organization failed.
async fn discover_enterprise(
    ctx: &JobContext,
    source: &dyn SourceClient,
    enterprise: &str,
) -> JobResult<()> {
    ctx.progress.set_phase(ProgressPhase::ListingOrgs).await?;
    let organizations = ctx
        .until_cancelled(source.list_organizations(enterprise))
        .await??;
    ctx.progress.set_total_orgs(organizations.len() as u64).await?;
    ctx.progress.set_phase(ProgressPhase::ProcessingOrgs).await?;

    let mut last_error = None;
    let mut failed_orgs = 0usize;
    for organization in &organizations {
        ctx.check_cancelled()?;
        match discover_organization(ctx, source, organization).await {
            Ok(()) => {}
            Err(JobError::Cancelled) => return Err(JobError::Cancelled),
            Err(e) => {
                warn!(
                    progress_id = ctx.progress_id,
                    organization = %organization,
                    error = %e,
                    "Organization discovery failed, continuing"
                );
                failed_orgs += 1;
                last_error = Some(e);
            }
        }
        ctx.progress.inc_processed_orgs().await?;
    }

    match last_error {
        Some(e) if failed_orgs == organizations.len() => Err(e),
        _ => Ok(()),
    }
}

async fn discover_organization(
    ctx: &JobContext,
    source: &dyn SourceClient,
    organization: &str,
) -> JobResult<()> {
    let repos = ctx
        .until_cancelled(source.list_repositories(organization))
        .await??;
    store_repositories(ctx, repos).await
}

/// Upsert a listing; a repository that cannot be stored counts as failed
async fn store_repositories(ctx: &JobContext, repos: Vec<SourceRepository>) -> JobResult<()> {
    ctx.progress.add_repos(repos.len() as u64).await?;

    for source_repo in repos {
        ctx.check_cancelled()?;
        let full_name = source_repo.full_name.clone();
        match ctx.store.upsert_repository(&source_repo.into_repository()).await {
            Ok(_) => ctx.progress.inc_processed_repos().await?,
            Err(e) => {
                warn!(
                    progress_id = ctx.progress_id,
                    repository = %full_name,
                    error = %e,
                    "Failed to store discovered repository"
                );
                ctx.progress.inc_failed_repos().await?;
            }
        }
    }
    Ok(())
}
