//! API server: shared state, router layers, background sweep and
//! graceful shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::create_router;
use crate::config::{Config, ServerConfig};
use crate::discovery::{DiscoveryService, SourceClient};
use crate::jobs::JobSupervisor;
use crate::lifecycle::{LifecycleCoordinator, MigrationExecutor};
use crate::storage::SharedDataStore;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub supervisor: JobSupervisor,
    pub discovery: DiscoveryService,
    pub lifecycle: LifecycleCoordinator,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Wire the engine around one store and one supervisor
    pub fn new(
        store: SharedDataStore,
        source: Arc<dyn SourceClient>,
        executor: Arc<dyn MigrationExecutor>,
    ) -> Self {
        let supervisor = JobSupervisor::spawn(store.clone());
        Self {
            discovery: DiscoveryService::new(supervisor.clone(), source),
            lifecycle: LifecycleCoordinator::new(store, supervisor.clone(), executor),
            supervisor,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// API Server
// ============================================================================

/// HTTP front of the migration engine
pub struct ApiServer {
    config: ServerConfig,
    stale_job_timeout: Option<Duration>,
    reconcile_interval: Duration,
    shutdown_grace: Duration,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: &Config, state: AppState) -> Self {
        Self {
            config: config.server.clone(),
            stale_job_timeout: config.stale_job_timeout(),
            reconcile_interval: config.reconcile_interval(),
            shutdown_grace: config.shutdown_grace(),
            state,
        }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves, then cancel running jobs and
    /// give them `shutdown_grace` to finalize.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;
        tracing::info!("Starting API server on {}", addr);

        let background = CancellationToken::new();
        self.start_background_tasks(background.clone());

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        background.cancel();
        self.drain_jobs().await;
        tracing::info!("API server shutdown complete");
        Ok(())
    }

    async fn drain_jobs(&self) {
        let supervisor = &self.state.supervisor;
        match supervisor.shutdown().await {
            Ok(0) => return,
            Ok(signalled) => tracing::info!(jobs = signalled, "Cancelling running jobs"),
            Err(e) => {
                tracing::warn!(error = %e, "Job supervisor unavailable during shutdown");
                return;
            }
        }

        let deadline = Instant::now() + self.shutdown_grace;
        while Instant::now() < deadline {
            match supervisor.running_jobs().await {
                Ok(jobs) if jobs.is_empty() => return,
                Ok(_) => tokio::time::sleep(Duration::from_millis(100)).await,
                Err(_) => return,
            }
        }
        tracing::warn!("Jobs still running after shutdown grace period");
    }

    /// Start the stale job sweep when enabled
    fn start_background_tasks(&self, token: CancellationToken) {
        let Some(timeout) = self.stale_job_timeout else {
            tracing::debug!("Stale job sweep disabled");
            return;
        };

        let supervisor = self.state.supervisor.clone();
        let every = self.reconcile_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let older_than = match chrono::Duration::from_std(timeout) {
                    Ok(age) => Utc::now() - age,
                    Err(_) => continue,
                };
                match supervisor.reconcile_stale(older_than).await {
                    Ok(ids) if !ids.is_empty() => {
                        tracing::warn!(count = ids.len(), ids = ?ids, "Abandoned jobs marked failed");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Stale job sweep failed"),
                }
            }
        });

        tracing::info!(
            timeout_secs = timeout.as_secs(),
            interval_secs = every.as_secs(),
            "Stale job sweep started"
        );
    }
}

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    BindError(String),

    #[error("Serve error: {0}")]
    ServeError(String),
}
