//! Migration analytics derived on demand from status snapshots
//!
//! Everything here is a pure function of what the store returns; nothing
//! is cached between requests.

pub mod distribution;
pub mod summary;
pub mod velocity;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub use distribution::{
    complexity_distribution, size_distribution, ComplexityDistribution, SizeDistribution,
};
pub use summary::ProgressSummary;
pub use velocity::{eta, Eta, Velocity};

use crate::status::RepositoryStatus;
use crate::storage::{DataStore, RepositoryFilter, StoreResult};

/// Full analytics view for a set of repositories
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationAnalytics {
    pub summary: ProgressSummary,
    pub velocity_7d: Velocity,
    pub velocity_30d: Velocity,
    pub eta: Eta,
    pub complexity: ComplexityDistribution,
    pub size: SizeDistribution,
    pub generated_at: DateTime<Utc>,
}

impl MigrationAnalytics {
    /// Read a snapshot for `filter` and derive every figure from it.
    ///
    /// The ETA uses the 7-day velocity, falling back to 30 days when the
    /// last week saw no completions.
    pub async fn compute(
        store: &dyn DataStore,
        filter: &RepositoryFilter,
        now: DateTime<Utc>,
    ) -> StoreResult<Self> {
        let counts = store.status_counts(filter).await?;
        let summary = ProgressSummary::from_counts(&counts);

        let completions = store
            .completion_times(filter, now - Duration::days(30))
            .await?;
        let velocity_7d = Velocity::from_completions(&completions, 7, now);
        let velocity_30d = Velocity::from_completions(&completions, 30, now);

        let basis = if velocity_7d.is_stalled() {
            &velocity_30d
        } else {
            &velocity_7d
        };
        let eta = Eta::from_velocity(summary.remaining(), basis, now);

        let repos: Vec<_> = store
            .list_repositories(filter)
            .await?
            .into_iter()
            .filter(|r| r.status != RepositoryStatus::WontMigrate)
            .collect();

        Ok(Self {
            summary,
            velocity_7d,
            velocity_30d,
            eta,
            complexity: complexity_distribution(&repos),
            size: size_distribution(&repos),
            generated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Repository, SourcePlatform};
    use crate::storage::MemoryDataStore;

    #[tokio::test]
    async fn test_compute_over_store() {
        let store = MemoryDataStore::new();
        for (name, status) in [
            ("acme/a", RepositoryStatus::Complete),
            ("acme/b", RepositoryStatus::Pending),
            ("acme/c", RepositoryStatus::WontMigrate),
        ] {
            let repo = store
                .upsert_repository(&Repository::discovered(name, SourcePlatform::Github))
                .await
                .unwrap();
            store.update_repository_status(repo.id, status).await.unwrap();
        }

        let analytics = MigrationAnalytics::compute(&store, &RepositoryFilter::all(), Utc::now())
            .await
            .unwrap();

        assert_eq!(analytics.summary.total, 2);
        assert_eq!(analytics.summary.excluded, 1);
        assert_eq!(analytics.velocity_7d.completed_in_window, 1);
        assert_eq!(analytics.complexity.simple, 2);
        assert!(analytics.eta.days_remaining.is_some());
    }
}
