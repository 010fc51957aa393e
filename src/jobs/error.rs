//! Job error types

use thiserror::Error;

use crate::storage::StoreError;

/// Errors raised by the job supervisor and by job bodies
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed request (bad scope, bad target)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Another job is already running for the same scope
    #[error("A job is already running for {scope_key} (progress {existing_id})")]
    Conflict { scope_key: String, existing_id: i64 },

    /// Unknown progress id, or the job is no longer running
    #[error("Job not found: {0}")]
    NotFound(i64),

    /// Backend failure that may succeed on a later attempt
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// The job observed its cancellation token
    #[error("Job cancelled")]
    Cancelled,

    /// Supervisor unavailable or invariant broken
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Conflict { .. })
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ActiveScope {
                scope_key,
                existing_id,
            } => Self::Conflict {
                scope_key,
                existing_id,
            },
            StoreError::NotFound { id, .. } => Self::NotFound(id),
            StoreError::Duplicate { entity, key } => {
                Self::Validation(format!("{entity} already exists: {key}"))
            }
            StoreError::Database(_) | StoreError::Io(_) => Self::Transient(err.to_string()),
            StoreError::Corrupt(_) | StoreError::Poisoned => Self::Internal(err.to_string()),
        }
    }
}

/// Result type for job operations
pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_scope_maps_to_conflict() {
        let err: JobError = StoreError::ActiveScope {
            scope_key: "discovery:organization:acme".to_string(),
            existing_id: 7,
        }
        .into();
        assert!(matches!(err, JobError::Conflict { existing_id: 7, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_not_found_keeps_id() {
        let err: JobError = StoreError::not_found("progress", 42).into();
        assert!(matches!(err, JobError::NotFound(42)));
        assert!(!err.is_recoverable());
    }
}
