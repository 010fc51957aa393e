//! REST API handlers
//!
//! Thin adapters: parse the request, call the engine, wrap the result in
//! [`ApiResponse`]. Errors go through [`ApiError`].

use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::server::AppState;
use crate::analytics::MigrationAnalytics;
use crate::metrics;
use crate::status::RepositoryStatus;
use crate::storage::RepositoryFilter;

const DEFAULT_PROGRESS_LIMIT: usize = 20;
const MAX_PROGRESS_LIMIT: usize = 200;

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub running_jobs: usize,
}

#[derive(Debug, Deserialize)]
pub struct StartDiscoveryRequest {
    pub discovery_type: String,
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct JobStartedResponse {
    pub progress_id: i64,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub progress_id: i64,
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProgressListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchMembersRequest {
    pub repository_ids: Vec<i64>,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/api/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        // Discovery and jobs
        .route("/api/discovery", post(start_discovery))
        .route("/api/discovery/progress", get(list_progress))
        .route("/api/jobs", get(list_running_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        // Repositories
        .route("/api/repositories", get(list_repositories))
        .route("/api/repositories/{id}", get(get_repository))
        .route("/api/repositories/{id}/history", get(repository_history))
        .route("/api/repositories/{id}/transition", post(transition_repository))
        .route("/api/repositories/{id}/rollback", post(rollback_repository))
        .route(
            "/api/repositories/{id}/wont-migrate",
            post(mark_wont_migrate).delete(unmark_wont_migrate),
        )
        // Batches
        .route("/api/batches", post(create_batch).get(list_batches))
        .route("/api/batches/{id}", get(get_batch))
        .route(
            "/api/batches/{id}/repositories",
            post(add_batch_repositories).delete(remove_batch_repositories),
        )
        .route("/api/batches/{id}/dry-run", post(start_dry_run))
        .route("/api/batches/{id}/migrate", post(start_migration))
        .route("/api/batches/{id}/retry", post(retry_batch))
        // Analytics
        .route("/api/analytics/summary", get(analytics_summary))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Count requests per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let started = Instant::now();

    let response = next.run(request).await;
    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let running_jobs = state.supervisor.running_jobs().await?.len();

    Ok(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        running_jobs,
    }))
}

async fn prometheus_metrics() -> ApiResult<Response> {
    let text = metrics::encode_metrics().map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

// ============================================================================
// Discovery and Job Handlers
// ============================================================================

async fn start_discovery(
    State(state): State<AppState>,
    Json(request): Json<StartDiscoveryRequest>,
) -> ApiResult<impl IntoResponse> {
    let progress_id = state
        .discovery
        .start_discovery_raw(&request.discovery_type, &request.target)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::success(JobStartedResponse { progress_id }),
    ))
}

async fn list_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressListQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PROGRESS_LIMIT)
        .clamp(1, MAX_PROGRESS_LIMIT);
    Ok(ApiResponse::success(
        state.supervisor.list_progress(limit).await?,
    ))
}

async fn list_running_jobs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(state.supervisor.running_jobs().await?))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(state.supervisor.get_progress(id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.supervisor.cancel(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::success(CancelResponse {
            progress_id: id,
            cancelled: true,
        }),
    ))
}

// ============================================================================
// Repository Handlers
// ============================================================================

async fn list_repositories(
    State(state): State<AppState>,
    Query(filter): Query<RepositoryFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(
        state.lifecycle.list_repositories(&filter).await?,
    ))
}

async fn get_repository(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(state.lifecycle.get_repository(id).await?))
}

async fn repository_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(state.lifecycle.history(id).await?))
}

async fn transition_repository(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<impl IntoResponse> {
    let to = request
        .status
        .trim()
        .parse::<RepositoryStatus>()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(ApiResponse::success(state.lifecycle.transition(id, to).await?))
}

async fn rollback_repository(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let reason = optional_reason(&body)?;
    Ok(ApiResponse::success(state.lifecycle.rollback(id, reason).await?))
}

async fn mark_wont_migrate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let reason = optional_reason(&body)?;
    Ok(ApiResponse::success(
        state.lifecycle.mark_wont_migrate(id, reason).await?,
    ))
}

async fn unmark_wont_migrate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(
        state.lifecycle.unmark_wont_migrate(id).await?,
    ))
}

/// The reason body is optional; an empty body means no reason
fn optional_reason(body: &Bytes) -> ApiResult<Option<String>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: ReasonRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(request.reason.filter(|r| !r.trim().is_empty()))
}

// ============================================================================
// Batch Handlers
// ============================================================================

async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let batch = state
        .lifecycle
        .create_batch(&request.name, request.description)
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::success(batch)))
}

async fn list_batches(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(state.lifecycle.list_batches().await?))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(state.lifecycle.get_batch(id).await?))
}

async fn add_batch_repositories(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<BatchMembersRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(
        state
            .lifecycle
            .add_repositories(id, &request.repository_ids)
            .await?,
    ))
}

async fn remove_batch_repositories(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<BatchMembersRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::success(
        state
            .lifecycle
            .remove_repositories(id, &request.repository_ids)
            .await?,
    ))
}

async fn start_dry_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let report = state.lifecycle.start_dry_run(id).await?;
    Ok((StatusCode::ACCEPTED, ApiResponse::success(report)))
}

async fn start_migration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let report = state.lifecycle.start_migration(id).await?;
    Ok((StatusCode::ACCEPTED, ApiResponse::success(report)))
}

async fn retry_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let report = state.lifecycle.retry_batch(id).await?;
    Ok((StatusCode::ACCEPTED, ApiResponse::success(report)))
}

// ============================================================================
// Analytics Handlers
// ============================================================================

async fn analytics_summary(
    State(state): State<AppState>,
    Query(filter): Query<RepositoryFilter>,
) -> ApiResult<impl IntoResponse> {
    let analytics =
        MigrationAnalytics::compute(state.lifecycle.store().as_ref(), &filter, Utc::now()).await?;
    Ok(ApiResponse::success(analytics))
}
