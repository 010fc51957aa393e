//! CLI command implementations

pub mod discover;
pub mod serve;
pub mod summary;

use std::sync::Arc;

use anyhow::{Context, Result};

use ghmigrate::api::AppState;
use ghmigrate::config::Config;
use ghmigrate::discovery::GitHubClient;
use ghmigrate::lifecycle::SimulatedExecutor;
use ghmigrate::storage::{SharedDataStore, SqliteDataStore};

// Re-export command functions for convenience
pub use discover::{discover, reconcile};
pub use serve::serve;
pub use summary::summary;

/// Open the configured store
pub fn open_store(config: &Config) -> Result<SharedDataStore> {
    let store = if config.in_memory_database() {
        SqliteDataStore::in_memory()?
    } else {
        SqliteDataStore::new(&config.database.sqlite_path).with_context(|| {
            format!(
                "Failed to open database: {}",
                config.database.sqlite_path.display()
            )
        })?
    };
    Ok(Arc::new(store))
}

/// Wire store, supervisor, source client and executor together
pub fn build_state(config: &Config) -> Result<AppState> {
    let store = open_store(config)?;
    let source = GitHubClient::new(&config.source).context("Failed to create source client")?;
    Ok(AppState::new(
        store,
        Arc::new(source),
        Arc::new(SimulatedExecutor::new()),
    ))
}
