//! Migration lifecycle: per-repository transitions and batch orchestration
//!
//! - [`LifecycleCoordinator`] validates and records every status change
//! - [`batch::rollup`] derives a batch status from member statuses
//! - [`runner`] is the body of supervised dry-run / migration jobs
//! - [`executor::MigrationExecutor`] is the seam to the destination platform

pub mod batch;
pub mod coordinator;
pub mod executor;
pub mod runner;

use thiserror::Error;

use crate::jobs::JobError;
use crate::status::RepositoryStatus;
use crate::storage::StoreError;

pub use batch::{rollup, BatchOperationReport, RepositoryFailure};
pub use coordinator::LifecycleCoordinator;
pub use executor::{ExecutorError, MigrationExecutor, MigrationPhase, SimulatedExecutor};
pub use runner::RunMode;

/// Errors raised by lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Transition not allowed by the transition table
    #[error("Repository {repository_id} cannot move from {from} to {to}")]
    InvalidTransition {
        repository_id: i64,
        from: RepositoryStatus,
        to: RepositoryStatus,
    },

    /// Request rejected before touching state
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Natural-key clash (batch name)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Failure starting or controlling a job
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl LifecycleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Duplicate { entity, key } => {
                Self::Conflict(format!("{entity} already exists: {key}"))
            }
            StoreError::ActiveScope { .. } => Self::Job(err.into()),
            other => Self::Store(other),
        }
    }
}

impl From<LifecycleError> for JobError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Job(e) => e,
            LifecycleError::Store(e) => e.into(),
            other => JobError::Internal(other.to_string()),
        }
    }
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;
