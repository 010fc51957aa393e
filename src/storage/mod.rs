//! Persistence for repositories, batches, history and job progress
//!
//! Business logic depends only on the [`DataStore`] trait. Two
//! implementations ship with the crate:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Lifecycle coordinator / job supervisor / API         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DataStore trait                        │
//! └─────────────────────────────────────────────────────────────┘
//!                   │                         │
//!                   ▼                         ▼
//!         ┌─────────────────┐       ┌─────────────────┐
//!         │ SqliteDataStore │       │ MemoryDataStore │
//!         └─────────────────┘       └─────────────────┘
//! ```

pub mod filter;
pub mod memory;
pub mod repository;
pub mod sqlite;

use thiserror::Error;

pub use filter::{Query, RepositoryFilter};
pub use memory::MemoryDataStore;
pub use repository::{DataStore, ProgressUpdate, SharedDataStore};
pub use sqlite::SqliteDataStore;

/// Errors raised by [`DataStore`] implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// An in-progress record already exists for the scope
    #[error("Active job already exists for scope '{scope_key}' (progress {existing_id})")]
    ActiveScope { scope_key: String, existing_id: i64 },

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Unique constraint on a natural key
    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored value could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Connection mutex was poisoned by a panicking holder
    #[error("Store lock poisoned")]
    Poisoned,

    /// I/O error while preparing the database location
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
