//! ghmigrate - Repository migration lifecycle engine
//!
//! Discovers repositories on GitHub and Azure DevOps, tracks each one
//! through dry-run and migration, groups them into batches and reports
//! progress, velocity and ETA.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`status`] - Repository status vocabulary, buckets and transition table
//! - [`models`] - Core data structures and types
//! - [`storage`] - `DataStore` trait with SQLite and in-memory stores
//! - [`jobs`] - Job supervisor actor, cancellation and progress tracking
//! - [`discovery`] - Source platform clients and the discovery job
//! - [`lifecycle`] - Transitions, batches and dry-run/migration jobs
//! - [`analytics`] - Summary, velocity, ETA and distributions
//! - [`api`] - HTTP API (axum)
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ghmigrate::discovery::{DiscoveryService, GitHubClient};
//! use ghmigrate::jobs::JobSupervisor;
//! use ghmigrate::models::DiscoveryType;
//! use ghmigrate::prelude::*;
//! use ghmigrate::storage::{SharedDataStore, SqliteDataStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store: SharedDataStore = Arc::new(SqliteDataStore::new(&config.database.sqlite_path)?);
//!     let supervisor = JobSupervisor::spawn(store);
//!     let discovery =
//!         DiscoveryService::new(supervisor.clone(), Arc::new(GitHubClient::new(&config.source)?));
//!
//!     let id = discovery.start_discovery(DiscoveryType::Organization, "acme").await?;
//!     let progress = supervisor.wait_for_completion(id, Duration::from_secs(1)).await?;
//!     println!("{} repositories", progress.processed_repos);
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod status;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, MigratorErrorTrait, Result};
    pub use crate::jobs::{JobError, JobSupervisor};
    pub use crate::lifecycle::LifecycleCoordinator;
    pub use crate::models::{Batch, DiscoveryProgress, Repository};
    pub use crate::status::{Bucket, RepositoryStatus};
    pub use crate::storage::{DataStore, RepositoryFilter};
}

// Direct re-exports for convenience
pub use models::{Batch, DiscoveryProgress, Repository};
pub use status::RepositoryStatus;
