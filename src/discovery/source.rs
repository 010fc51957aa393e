//! Source platform abstraction for discovery

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::JobError;
use crate::models::{Repository, SourcePlatform};
use crate::utils::sanitize_message;

/// Errors that can occur while talking to a source platform
#[derive(Error, Debug)]
pub enum SourceError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected status code
    #[error("Source returned status {status} for {url}")]
    Status { status: u16, url: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Credentials missing or rejected
    #[error("Unauthorized: check the access token")]
    Unauthorized,

    /// Enterprise, organization or project does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl SourceError {
    /// Whether retrying the request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            Self::RateLimited => true,
            Self::Unauthorized
            | Self::NotFound(_)
            | Self::InvalidResponse(_)
            | Self::InvalidUrl(_) => false,
        }
    }
}

impl From<SourceError> for JobError {
    fn from(err: SourceError) -> Self {
        JobError::Transient(sanitize_message(&err.to_string()))
    }
}

/// A repository as reported by the source platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRepository {
    pub full_name: String,
    pub source: SourcePlatform,
    pub size_bytes: u64,
    #[serde(default)]
    pub has_lfs: bool,
    #[serde(default)]
    pub has_submodules: bool,
    #[serde(default)]
    pub has_actions: bool,
    #[serde(default)]
    pub has_wiki: bool,
}

impl SourceRepository {
    pub fn new(full_name: impl Into<String>, source: SourcePlatform) -> Self {
        Self {
            full_name: full_name.into(),
            source,
            size_bytes: 0,
            has_lfs: false,
            has_submodules: false,
            has_actions: false,
            has_wiki: false,
        }
    }

    /// Convert into a pending repository with its complexity score computed
    pub fn into_repository(self) -> Repository {
        let mut repo = Repository::discovered(self.full_name, self.source);
        repo.total_size_bytes = self.size_bytes;
        repo.has_lfs = self.has_lfs;
        repo.has_submodules = self.has_submodules;
        repo.has_actions = self.has_actions;
        repo.has_wiki = self.has_wiki;
        repo.compute_complexity();
        repo
    }
}

/// Read-only listing API of a source platform
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Organizations belonging to an enterprise
    async fn list_organizations(&self, enterprise: &str) -> Result<Vec<String>, SourceError>;

    /// Repositories of one organization
    async fn list_repositories(&self, organization: &str)
        -> Result<Vec<SourceRepository>, SourceError>;

    /// Repositories of one Azure DevOps project
    async fn list_project_repositories(
        &self,
        organization: &str,
        project: &str,
    ) -> Result<Vec<SourceRepository>, SourceError>;
}

// ============================================================================
// Static Source
// ============================================================================

/// In-memory source with fixed listings, used by tests and local runs
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    enterprises: HashMap<String, Vec<String>>,
    organizations: HashMap<String, Vec<SourceRepository>>,
    projects: HashMap<String, Vec<SourceRepository>>,
    failing: HashSet<String>,
    delay: Duration,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enterprise<I, S>(mut self, enterprise: &str, organizations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enterprises.insert(
            enterprise.to_lowercase(),
            organizations.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Add an organization whose repositories are `{org}/{name}`
    pub fn with_organization<I, S>(mut self, organization: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let repos = names
            .into_iter()
            .map(|n| {
                SourceRepository::new(
                    format!("{organization}/{}", n.as_ref()),
                    SourcePlatform::Github,
                )
            })
            .collect();
        self.organizations.insert(organization.to_lowercase(), repos);
        self
    }

    /// Add an Azure DevOps project whose repositories are `{org}/{project}/{name}`
    pub fn with_project<I, S>(mut self, organization: &str, project: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let repos = names
            .into_iter()
            .map(|n| {
                SourceRepository::new(
                    format!("{organization}/{project}/{}", n.as_ref()),
                    SourcePlatform::AzureDevops,
                )
            })
            .collect();
        self.projects
            .insert(format!("{organization}/{project}").to_lowercase(), repos);
        self
    }

    /// Listing this organization fails with a server error
    pub fn failing(mut self, organization: &str) -> Self {
        self.failing.insert(organization.to_lowercase());
        self
    }

    /// Sleep before every listing call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn check_failing(&self, key: &str) -> Result<(), SourceError> {
        if self.failing.contains(key) {
            return Err(SourceError::Status {
                status: 503,
                url: format!("static://{key}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SourceClient for StaticSource {
    async fn list_organizations(&self, enterprise: &str) -> Result<Vec<String>, SourceError> {
        self.pause().await;
        self.enterprises
            .get(&enterprise.to_lowercase())
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("enterprise {enterprise}")))
    }

    async fn list_repositories(
        &self,
        organization: &str,
    ) -> Result<Vec<SourceRepository>, SourceError> {
        self.pause().await;
        let key = organization.to_lowercase();
        self.check_failing(&key)?;
        self.organizations
            .get(&key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("organization {organization}")))
    }

    async fn list_project_repositories(
        &self,
        organization: &str,
        project: &str,
    ) -> Result<Vec<SourceRepository>, SourceError> {
        self.pause().await;
        let key = format!("{organization}/{project}").to_lowercase();
        self.check_failing(&key)?;
        self.projects
            .get(&key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("project {organization}/{project}")))
    }
}
