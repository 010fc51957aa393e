//! Source listing against a mock GitHub / Azure DevOps server

mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ghmigrate::config::SourceConfig;
use ghmigrate::discovery::{DiscoveryService, GitHubClient, SourceClient, SourceError};
use ghmigrate::jobs::JobSupervisor;
use ghmigrate::models::{DiscoveryType, ProgressStatus, SourcePlatform};
use ghmigrate::storage::RepositoryFilter;
use ghmigrate::utils::retry::RetryConfig;

use common::{memory_store, wait_final};

fn source_config() -> SourceConfig {
    SourceConfig {
        token: Some("ghp_test".to_string()),
        ado_token: Some("pat".to_string()),
        requests_per_second: 100,
        timeout_secs: 5,
        ..SourceConfig::default()
    }
}

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::with_base_url(&server.uri(), &source_config())
        .unwrap()
        .with_retry(RetryConfig::with_delays(2, 1, 5))
}

#[tokio::test]
async fn test_org_listing_follows_link_header() {
    let server = MockServer::start().await;
    let next = format!("{}/orgs/acme/repos?page=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .and(query_param("per_page", "100"))
        .and(header("authorization", "Bearer ghp_test"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", format!(r#"<{next}>; rel="next""#).as_str())
                .set_body_json(json!([
                    {"full_name": "acme/api", "size": 2048, "has_wiki": true},
                    {"full_name": "acme/web", "size": 10}
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"full_name": "acme/docs"}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repos = client(&server).list_repositories("acme").await.unwrap();
    let names: Vec<&str> = repos.iter().map(|r| r.full_name.as_str()).collect();
    assert_eq!(names, ["acme/api", "acme/web", "acme/docs"]);
    assert_eq!(repos[0].size_bytes, 2048 * 1024);
    assert!(repos[0].has_wiki);
    assert!(!repos[1].has_wiki);
}

#[tokio::test]
async fn test_enterprise_organizations_are_paginated() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"slug": "bigcorp", "cursor": null}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"enterprise": {"organizations": {
                "nodes": [{"login": "acme"}, {"login": "globex"}],
                "pageInfo": {"hasNextPage": true, "endCursor": "c1"}
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"cursor": "c1"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"enterprise": {"organizations": {
                "nodes": [{"login": "initech"}],
                "pageInfo": {"hasNextPage": false, "endCursor": null}
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orgs = client(&server).list_organizations("bigcorp").await.unwrap();
    assert_eq!(orgs, ["acme", "globex", "initech"]);
}

#[tokio::test]
async fn test_unknown_enterprise_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"enterprise": null}})),
        )
        .mount(&server)
        .await;

    let result = client(&server).list_organizations("nobody").await;
    assert!(matches!(result, Err(SourceError::NotFound(_))));
}

#[tokio::test]
async fn test_graphql_errors_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "Resource not accessible by integration"}]
        })))
        .mount(&server)
        .await;

    match client(&server).list_organizations("bigcorp").await {
        Err(SourceError::InvalidResponse(message)) => {
            assert!(message.contains("not accessible"))
        }
        other => panic!("expected invalid response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_project_listing_skips_disabled_repositories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contoso/platform/_apis/git/repositories"))
        .and(query_param("api-version", "7.1"))
        .and(header("authorization", "Basic OnBhdA=="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 3,
            "value": [
                {"name": "core", "size": 4096},
                {"name": "legacy", "size": 1, "isDisabled": true},
                {"name": "tools"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repos = client(&server)
        .list_project_repositories("contoso", "platform")
        .await
        .unwrap();
    let names: Vec<&str> = repos.iter().map(|r| r.full_name.as_str()).collect();
    assert_eq!(names, ["contoso/platform/core", "contoso/platform/tools"]);
    assert_eq!(repos[0].size_bytes, 4096);
    assert_eq!(repos[0].source, SourcePlatform::AzureDevops);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"full_name": "acme/api"}])))
        .expect(1)
        .mount(&server)
        .await;

    let repos = client(&server).list_repositories("acme").await.unwrap();
    assert_eq!(repos.len(), 1);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/missing/repos"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/private/repos"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(matches!(
        client.list_repositories("missing").await,
        Err(SourceError::NotFound(_))
    ));
    assert!(matches!(
        client.list_repositories("private").await,
        Err(SourceError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_exhausted_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"))
        .expect(1)
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri(), &source_config())
        .unwrap()
        .with_retry(RetryConfig::none());
    assert!(matches!(
        client.list_repositories("acme").await,
        Err(SourceError::RateLimited)
    ));
}

#[tokio::test]
async fn test_discovery_job_against_mock_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"full_name": "acme/api", "size": 10},
            {"full_name": "acme/web", "size": 20}
        ])))
        .mount(&server)
        .await;

    let store = memory_store();
    let supervisor = JobSupervisor::spawn(store.clone());
    let service = DiscoveryService::new(supervisor.clone(), Arc::new(client(&server)));

    let id = service
        .start_discovery(DiscoveryType::Organization, "acme")
        .await
        .unwrap();
    let progress = wait_final(&supervisor, id).await;
    assert_eq!(progress.status, ProgressStatus::Complete);
    assert_eq!(progress.processed_repos, 2);

    let repos = store
        .list_repositories(&RepositoryFilter::for_organization("acme"))
        .await
        .unwrap();
    assert_eq!(repos.len(), 2);
}
