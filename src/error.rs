//! Unified error handling for the ghmigrate crate
//!
//! Each domain keeps its own error enum; [`Error`] wraps them for code
//! that crosses module boundaries (CLI, HTTP layer).
//!
//! # Architecture
//!
//! - [`MigratorErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use ghmigrate::error::{Error, ErrorCategory, MigratorErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     match err.category() {
//!         ErrorCategory::Conflict => println!("Already running: {err}"),
//!         _ if err.is_recoverable() => println!("Retrying: {err}"),
//!         _ => eprintln!("Fatal error: {err}"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::config::ConfigError;
pub use crate::discovery::SourceError;
pub use crate::jobs::JobError;
pub use crate::lifecycle::{ExecutorError, LifecycleError};
pub use crate::storage::StoreError;

/// Common trait for all ghmigrate error types
pub trait MigratorErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed request or illegal state change
    Validation,
    /// An equivalent job is already running
    Conflict,
    /// Unknown entity or job
    NotFound,
    /// Source platform or HTTP errors
    Network,
    /// Database and I/O errors
    Storage,
    /// Configuration errors
    Config,
    /// Internal signals and unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the ghmigrate crate
#[derive(Error, Debug)]
pub enum Error {
    /// Job supervisor and job body errors
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Lifecycle and batch errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Source platform errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MigratorErrorTrait for JobError {
    fn is_recoverable(&self) -> bool {
        JobError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Transient(_) => ErrorCategory::Storage,
            Self::Cancelled | Self::Internal(_) => ErrorCategory::Other,
        }
    }
}

impl MigratorErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ActiveScope { .. } | Self::Duplicate { .. } => ErrorCategory::Conflict,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Database(_) | Self::Corrupt(_) | Self::Poisoned | Self::Io(_) => {
                ErrorCategory::Storage
            }
        }
    }
}

impl MigratorErrorTrait for LifecycleError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Job(e) => e.is_recoverable(),
            Self::Store(e) => MigratorErrorTrait::is_recoverable(e),
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTransition { .. } | Self::Validation(_) => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Job(e) => e.category(),
            Self::Store(e) => e.category(),
        }
    }
}

impl MigratorErrorTrait for SourceError {
    fn is_recoverable(&self) -> bool {
        SourceError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::InvalidUrl(_) => ErrorCategory::Config,
            _ => ErrorCategory::Network,
        }
    }
}

impl MigratorErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Job(e) => e.is_recoverable(),
            Self::Lifecycle(e) => e.is_recoverable(),
            Self::Store(e) => MigratorErrorTrait::is_recoverable(e),
            Self::Source(e) => SourceError::is_recoverable(e),
            Self::Config(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Job(e) => e.category(),
            Self::Lifecycle(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::Source(e) => e.category(),
            Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
