//! GitHub and Azure DevOps listing client
//!
//! - Rate limiting with governor
//! - Retry with exponential backoff on 429 and 5xx
//! - REST pagination through `Link: <...>; rel="next"` headers
//! - Enterprise organizations through the GraphQL API

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    header::{HeaderMap, ACCEPT, LINK, USER_AGENT},
    Client, RequestBuilder, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;

use super::source::{SourceClient, SourceError, SourceRepository};
use crate::config::SourceConfig;
use crate::metrics;
use crate::models::SourcePlatform;
use crate::utils::retry::{with_retry_if, RetryConfig};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_ADO_URL: &str = "https://dev.azure.com";

const PER_PAGE: u32 = 100;
const ADO_API_VERSION: &str = "7.1";
const GITHUB_API_VERSION: &str = "2022-11-28";

const ENTERPRISE_ORGS_QUERY: &str = r#"
query($slug: String!, $cursor: String) {
  enterprise(slug: $slug) {
    organizations(first: 100, after: $cursor) {
      nodes { login }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

/// Listing client for GitHub (REST + GraphQL) and Azure DevOps
pub struct GitHubClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    api_url: Url,
    ado_url: Url,
    token: Option<String>,
    ado_token: Option<String>,
    retry: RetryConfig,
}

impl GitHubClient {
    /// Build a client from the `[source]` configuration
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            api_url: parse_base(&config.github_api_url)?,
            ado_url: parse_base(&config.ado_url)?,
            token: config.token.clone().filter(|t| !t.is_empty()),
            ado_token: config.ado_token.clone().filter(|t| !t.is_empty()),
            retry: RetryConfig::with_delays(config.max_retries, 1000, 30_000),
        })
    }

    /// Point both APIs at a mock server
    pub fn with_base_url(base_url: &str, config: &SourceConfig) -> Result<Self, SourceError> {
        let mut client = Self::new(config)?;
        client.api_url = parse_base(base_url)?;
        client.ado_url = parse_base(base_url)?;
        Ok(client)
    }

    /// Override backoff delays (tests use short ones)
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn github_url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn github_request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("ghmigrate/", env!("CARGO_PKG_VERSION")))
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn ado_request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("ghmigrate/", env!("CARGO_PKG_VERSION")));
        match &self.ado_token {
            Some(pat) => builder.basic_auth("", Some(pat)),
            None => builder,
        }
    }

    /// Send one request under the rate limiter, retrying recoverable failures
    async fn send<F>(&self, endpoint: &'static str, build: F) -> Result<Response, SourceError>
    where
        F: Fn() -> RequestBuilder,
    {
        let build = &build;
        let limiter = &self.rate_limiter;
        with_retry_if(
            &self.retry,
            || async move {
                limiter.until_ready().await;
                let started = Instant::now();
                let result = build().send().await;
                let status = result.as_ref().map_or(0, |r| r.status().as_u16());
                metrics::record_api_request(endpoint, status, started.elapsed().as_secs_f64());
                check_status(result?)
            },
            SourceError::is_recoverable,
        )
        .await
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &Url,
        ado: bool,
    ) -> Result<(T, Option<Url>), SourceError> {
        let response = self
            .send(endpoint, || {
                let builder = self.client.get(url.clone());
                if ado {
                    self.ado_request(builder)
                } else {
                    self.github_request(builder)
                }
            })
            .await?;

        let next = next_link(response.headers());
        let body = response.json::<T>().await?;
        Ok((body, next))
    }
}

#[async_trait]
impl SourceClient for GitHubClient {
    #[instrument(skip(self))]
    async fn list_organizations(&self, enterprise: &str) -> Result<Vec<String>, SourceError> {
        let url = self.github_url(&["graphql"])?;
        let mut organizations = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let body = json!({
                "query": ENTERPRISE_ORGS_QUERY,
                "variables": { "slug": enterprise, "cursor": cursor },
            });
            let response = self
                .send("source_graphql", || {
                    self.github_request(self.client.post(url.clone())).json(&body)
                })
                .await?;
            let page: GraphQlResponse<EnterpriseData> = response.json().await?;

            if let Some(errors) = page.errors.filter(|e| !e.is_empty()) {
                let message = errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(SourceError::InvalidResponse(message));
            }

            let Some(enterprise_node) = page.data.and_then(|d| d.enterprise) else {
                return Err(SourceError::NotFound(format!("enterprise {enterprise}")));
            };
            let connection = enterprise_node.organizations;
            organizations.extend(connection.nodes.into_iter().map(|n| n.login));

            if !connection.page_info.has_next_page {
                break;
            }
            match connection.page_info.end_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    warn!(enterprise = enterprise, "hasNextPage without endCursor");
                    break;
                }
            }
        }

        debug!(
            enterprise = enterprise,
            count = organizations.len(),
            "Listed enterprise organizations"
        );
        Ok(organizations)
    }

    #[instrument(skip(self))]
    async fn list_repositories(
        &self,
        organization: &str,
    ) -> Result<Vec<SourceRepository>, SourceError> {
        let mut url = self.github_url(&["orgs", organization, "repos"])?;
        url.query_pairs_mut()
            .append_pair("type", "all")
            .append_pair("per_page", &PER_PAGE.to_string());

        let mut repos = Vec::new();
        let mut next = Some(url);
        while let Some(page_url) = next {
            let (page, link): (Vec<GitHubRepo>, _) =
                self.get_page("source_org_repos", &page_url, false).await?;
            repos.extend(page.into_iter().map(GitHubRepo::into_source));
            next = link;
        }

        debug!(
            organization = organization,
            count = repos.len(),
            "Listed organization repositories"
        );
        Ok(repos)
    }

    #[instrument(skip(self))]
    async fn list_project_repositories(
        &self,
        organization: &str,
        project: &str,
    ) -> Result<Vec<SourceRepository>, SourceError> {
        let mut url = self.ado_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.ado_url.to_string()))?
            .pop_if_empty()
            .extend([organization, project, "_apis", "git", "repositories"]);
        url.query_pairs_mut()
            .append_pair("api-version", ADO_API_VERSION);

        let (list, _): (AdoRepoList, _) = self.get_page("source_ado_repos", &url, true).await?;
        let repos = list
            .value
            .into_iter()
            .filter(|r| !r.is_disabled)
            .map(|r| r.into_source(organization, project))
            .collect::<Vec<_>>();

        debug!(
            organization = organization,
            project = project,
            count = repos.len(),
            "Listed project repositories"
        );
        Ok(repos)
    }
}

fn parse_base(raw: &str) -> Result<Url, SourceError> {
    let url = Url::parse(raw.trim()).map_err(|e| SourceError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(SourceError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

/// Map a response status to a typed error
fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                == Some("0"));

    Err(match status {
        _ if rate_limited => SourceError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unauthorized,
        StatusCode::NOT_FOUND => SourceError::NotFound(url),
        _ => SourceError::Status {
            status: status.as_u16(),
            url,
        },
    })
}

/// Extract the `rel="next"` target of a `Link` header
fn next_link(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().eq_ignore_ascii_case(r#"rel="next""#));
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    full_name: String,
    /// Kilobytes
    #[serde(default)]
    size: u64,
    #[serde(default)]
    has_wiki: bool,
}

impl GitHubRepo {
    fn into_source(self) -> SourceRepository {
        let mut repo = SourceRepository::new(self.full_name, SourcePlatform::Github);
        repo.size_bytes = self.size.saturating_mul(1024);
        repo.has_wiki = self.has_wiki;
        repo
    }
}

#[derive(Debug, Deserialize)]
struct AdoRepoList {
    #[serde(default)]
    value: Vec<AdoRepo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdoRepo {
    name: String,
    /// Bytes
    #[serde(default)]
    size: u64,
    #[serde(default)]
    is_disabled: bool,
}

impl AdoRepo {
    fn into_source(self, organization: &str, project: &str) -> SourceRepository {
        let mut repo = SourceRepository::new(
            format!("{organization}/{project}/{}", self.name),
            SourcePlatform::AzureDevops,
        );
        repo.size_bytes = self.size;
        repo
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct EnterpriseData {
    enterprise: Option<EnterpriseNode>,
}

#[derive(Debug, Deserialize)]
struct EnterpriseNode {
    organizations: OrganizationConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationConnection {
    nodes: Vec<OrganizationNode>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct OrganizationNode {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/organizations/1/repos?page=2>; rel="next", <https://api.github.com/organizations/1/repos?page=5>; rel="last""#,
            ),
        );
        let next = next_link(&headers).unwrap();
        assert_eq!(next.query(), Some("page=2"));
    }

    #[test]
    fn test_next_link_absent_on_last_page() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(r#"<https://api.github.com/x?page=1>; rel="prev""#),
        );
        assert!(next_link(&headers).is_none());
        assert!(next_link(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_github_repo_size_is_kilobytes() {
        let repo: GitHubRepo =
            serde_json::from_str(r#"{"full_name":"acme/api","size":2048,"has_wiki":true}"#)
                .unwrap();
        let source = repo.into_source();
        assert_eq!(source.size_bytes, 2048 * 1024);
        assert!(source.has_wiki);
    }

    #[test]
    fn test_github_url_encodes_segments() {
        let client = GitHubClient::new(&SourceConfig::default()).unwrap();
        let url = client.github_url(&["orgs", "acme", "repos"]).unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/orgs/acme/repos");
    }
}
