//! HTTP API tests driven through the router without a socket

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ghmigrate::api::{create_router, AppState};
use ghmigrate::discovery::StaticSource;
use ghmigrate::lifecycle::SimulatedExecutor;

use common::{memory_store, wait_final};

fn test_app() -> (Router, AppState) {
    let _ = ghmigrate::metrics::init_metrics();
    let source = StaticSource::new()
        .with_organization("acme", ["api", "web"])
        .with_delay(Duration::from_millis(300));
    let state = AppState::new(
        memory_store(),
        Arc::new(source),
        Arc::new(SimulatedExecutor::new()),
    );
    (create_router(state.clone()), state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["running_jobs"], 0);
}

#[tokio::test]
async fn test_discovery_lifecycle_over_http() {
    let (app, state) = test_app();
    let request = json!({"discovery_type": "organization", "target": "acme"});

    let (status, body) = send(&app, Method::POST, "/api/discovery", Some(request.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["data"]["progress_id"].as_i64().unwrap();

    // Same scope, different case
    let duplicate = json!({"discovery_type": "organization", "target": "ACME"});
    let (status, body) = send(&app, Method::POST, "/api/discovery", Some(duplicate)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "conflict");

    let (status, body) = send(&app, Method::GET, &format!("/api/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["scope_key"], "discovery:organization:acme");

    let (status, _) = send(&app, Method::POST, &format!("/api/jobs/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(&app, Method::POST, &format!("/api/jobs/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let progress = wait_final(&state.supervisor, id).await;
    assert_eq!(progress.status.as_str(), "cancelled");

    // The scope is free again
    let (status, _) = send(&app, Method::POST, "/api/discovery", Some(request)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_discovery_rejects_bad_input() {
    let (app, _) = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/discovery",
        Some(json!({"discovery_type": "galaxy", "target": "acme"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/discovery",
        Some(json!({"discovery_type": "organization", "target": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let (app, _) = test_app();

    for uri in ["/api/jobs/999", "/api/repositories/999", "/api/batches/999"] {
        let (status, body) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"], "Resource not found");
    }
    let (status, _) = send(&app, Method::POST, "/api/jobs/999/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_flow_over_http() {
    let (app, state) = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/discovery",
        Some(json!({"discovery_type": "organization", "target": "acme"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let discovery = body["data"]["progress_id"].as_i64().unwrap();
    wait_final(&state.supervisor, discovery).await;

    let (status, body) = send(&app, Method::GET, "/api/repositories?organization=acme", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/batches",
        Some(json!({"name": "wave-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let batch = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/batches/{batch}/repositories"),
        Some(json!({"repository_ids": ids})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["succeeded"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, Method::POST, &format!("/api/batches/{batch}/migrate"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = body["data"]["progress_id"].as_i64().unwrap();
    wait_final(&state.supervisor, job).await;

    let (_, body) = send(&app, Method::GET, &format!("/api/batches/{batch}"), None).await;
    assert_eq!(body["data"]["status"], "completed");

    let (status, body) = send(&app, Method::GET, "/api/analytics/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["summary"]["completed"], 2);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/repositories/{}/rollback", ids[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "rolled_back");
}

#[tokio::test]
async fn test_invalid_transition_is_bad_request() {
    let (app, state) = test_app();
    let repo = common::seed_repositories(state.lifecycle.store(), "acme", &["api"]).await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/repositories/{}/transition", repo[0].id),
        Some(json!({"status": "complete"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/repositories/{}/transition", repo[0].id),
        Some(json!({"status": "not_a_status"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = test_app();
    send(&app, Method::GET, "/api/health", None).await;

    let response = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("ghmigrate_api_requests_total"));
}
