//! GitHub REST client.
//!
//! [`Transport`] performs one GET and reports status, rate-limit headers and
//! whether a next page exists. [`GitHubClient`] runs every request as a job
//! on the [`RequestPipeline`] and decodes the JSON payloads.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::model::{RemoteIssue, RemotePull, RemoteRepo, RemoteTeam, RemoteUser, SearchResult};
use crate::remote::pipeline::{Lane, RateLimit, RequestPipeline};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::{AUTHORIZATION, HeaderMap, LINK, USER_AGENT};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Results per page requested from list endpoints.
pub const PER_PAGE: u32 = 100;

/// Pages followed for user team / watched repository lists.
const MAX_LIST_PAGES: u32 = 10;

const USER_AGENT_VALUE: &str = concat!("ssync/", env!("CARGO_PKG_VERSION"));

/// One HTTP response, before status checking and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub rate_limit: Option<RateLimit>,
    /// A `Link: <...>; rel="next"` header was present.
    pub has_next: bool,
    pub body: String,
}

impl RawResponse {
    /// 200 response with a JSON body and no paging or rate-limit headers.
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            rate_limit: None,
            has_next: false,
            body: body.into(),
        }
    }
}

/// Performs GET requests against the API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or its body cannot be read.
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse>;
}

/// [`Transport`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "GET");

        let mut request = self
            .client
            .get(&url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .query(query);
        if let Some(token) = &self.access_token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers();
        let rate_limit = parse_rate_limit(headers);
        let has_next = headers
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .is_some_and(has_next_link);
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            rate_limit,
            has_next,
            body,
        })
    }
}

/// Read `x-ratelimit-{limit,remaining,reset}`; `None` if any is missing.
#[must_use]
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let number = |name: &str| -> Option<u64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };
    let limit = number("x-ratelimit-limit")?;
    let remaining = number("x-ratelimit-remaining")?;
    let reset = i64::try_from(number("x-ratelimit-reset")?).ok()?;
    Some(RateLimit {
        limit,
        remaining,
        reset: DateTime::from_timestamp(reset, 0)?,
    })
}

/// Whether a `Link` header value advertises a next page.
#[must_use]
pub fn has_next_link(link: &str) -> bool {
    link.split(',')
        .any(|part| part.contains("page=") && part.contains("rel=\"next\""))
}

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// API client whose requests are queued on a shared pipeline.
#[derive(Clone)]
pub struct GitHubClient {
    transport: Arc<dyn Transport>,
    pipeline: RequestPipeline,
    owner: String,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, pipeline: RequestPipeline) -> Self {
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            transport,
            pipeline,
            owner: format!("github-client:{id}"),
        }
    }

    /// Owner tag attached to this client's pipeline jobs.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub const fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// Drop this client's queued requests.
    pub fn cancel(&self) -> usize {
        self.pipeline.cancel(&self.owner)
    }

    /// GET `path` on `lane` and decode a 200 body as `T`. Also reports
    /// whether a next page exists.
    async fn request<T>(
        &self,
        lane: Lane,
        path: String,
        query: Vec<(String, String)>,
    ) -> Result<(T, bool)>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let pipeline = self.pipeline.clone();
        let job = async move {
            let raw = transport.get(&path, &query).await?;
            pipeline.gate().observe(raw.rate_limit);
            if raw.status != 200 {
                return Err(SyncError::api(raw.status, raw.body));
            }
            let value = serde_json::from_str(&raw.body)
                .map_err(|source| SyncError::Decode { path, source })?;
            Ok((value, raw.has_next))
        };
        self.pipeline.push_to(lane, &self.owner, job).await
    }

    /// `GET /search/issues`, newest updates first.
    ///
    /// # Errors
    ///
    /// Returns a transport, API, or decode error.
    pub async fn search_issues(&self, query: &str, page: u32, per_page: u32) -> Result<SearchResult> {
        let params = vec![
            ("per_page".to_string(), per_page.to_string()),
            ("page".to_string(), page.to_string()),
            ("sort".to_string(), "updated".to_string()),
            ("order".to_string(), "desc".to_string()),
            ("q".to_string(), query.to_string()),
        ];
        let (result, _) = self
            .request(Lane::Deferred, "/search/issues".to_string(), params)
            .await?;
        Ok(result)
    }

    /// `GET /repos/{repo}/pulls/{number}`.
    ///
    /// # Errors
    ///
    /// Returns a transport, API, or decode error.
    pub async fn pull_request(&self, repo: &str, number: i64) -> Result<RemotePull> {
        let (pull, _) = self
            .request(
                Lane::Deferred,
                format!("/repos/{repo}/pulls/{number}"),
                Vec::new(),
            )
            .await?;
        Ok(pull)
    }

    /// `GET /repos/{repo}/issues/{number}`.
    ///
    /// # Errors
    ///
    /// Returns a transport, API, or decode error.
    pub async fn issue(&self, repo: &str, number: i64) -> Result<RemoteIssue> {
        let (issue, _) = self
            .request(
                Lane::Deferred,
                format!("/repos/{repo}/issues/{number}"),
                Vec::new(),
            )
            .await?;
        Ok(issue)
    }

    /// `GET /user` on the immediate lane.
    ///
    /// # Errors
    ///
    /// Returns a transport, API, or decode error.
    pub async fn authenticated_user(&self) -> Result<RemoteUser> {
        let (user, _) = self
            .request(Lane::Immediate, "/user".to_string(), Vec::new())
            .await?;
        Ok(user)
    }

    /// Teams of the authenticated user as `org/slug`.
    ///
    /// # Errors
    ///
    /// Returns a transport, API, or decode error.
    pub async fn user_teams(&self) -> Result<Vec<String>> {
        let teams: Vec<RemoteTeam> = self.list_pages("/user/teams").await?;
        Ok(teams
            .into_iter()
            .map(|t| format!("{}/{}", t.organization.login, t.slug))
            .collect())
    }

    /// Repositories watched by the authenticated user as `owner/repo`.
    ///
    /// # Errors
    ///
    /// Returns a transport, API, or decode error.
    pub async fn watched_repos(&self) -> Result<Vec<String>> {
        let repos: Vec<RemoteRepo> = self.list_pages("/user/subscriptions").await?;
        Ok(repos.into_iter().map(|r| r.full_name).collect())
    }

    async fn list_pages<T>(&self, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut all = Vec::new();
        for page in 1..=MAX_LIST_PAGES {
            let params = vec![
                ("per_page".to_string(), PER_PAGE.to_string()),
                ("page".to_string(), page.to_string()),
            ];
            let (items, has_next): (Vec<T>, bool) = self
                .request(Lane::Deferred, path.to_string(), params)
                .await?;
            all.extend(items);
            if !has_next {
                break;
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedConfig;
    use parking_lot::Mutex;
    use reqwest::header::HeaderValue;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<RawResponse>>,
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse> {
            self.calls.lock().push((path.to_string(), query.to_vec()));
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| SyncError::api(599, "no scripted response"))
        }
    }

    fn client(responses: Vec<RawResponse>) -> (GitHubClient, Arc<Scripted>) {
        let transport = Arc::new(Scripted {
            responses: Mutex::new(responses.into()),
            calls: Mutex::default(),
        });
        let config = SyncConfig {
            api_interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        let pipeline = RequestPipeline::new(SharedConfig::new(config));
        pipeline.start();
        (GitHubClient::new(transport.clone(), pipeline), transport)
    }

    #[tokio::test]
    async fn test_search_sends_sorted_query() {
        let (client, transport) = client(vec![RawResponse::ok(r#"{"total_count":0,"items":[]}"#)]);
        let result = client
            .search_issues("is:open", 2, 100)
            .await
            .unwrap();
        assert_eq!(result.total_count, 0);

        let calls = transport.calls.lock();
        let (path, query) = &calls[0];
        assert_eq!(path, "/search/issues");
        assert!(query.contains(&("page".to_string(), "2".to_string())));
        assert!(query.contains(&("sort".to_string(), "updated".to_string())));
        assert!(query.contains(&("order".to_string(), "desc".to_string())));
        assert!(query.contains(&("q".to_string(), "is:open".to_string())));
    }

    #[tokio::test]
    async fn test_non_200_is_api_error() {
        let (client, _) = client(vec![RawResponse {
            status: 403,
            body: "forbidden".to_string(),
            ..RawResponse::ok("")
        }]);
        let err = client.authenticated_user().await.unwrap_err();
        assert!(matches!(err, SyncError::Api { status: 403, .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_decode_error() {
        let (client, _) = client(vec![RawResponse::ok("<html>unicorn</html>")]);
        let err = client.search_issues("is:open", 1, 100).await.unwrap_err();
        assert!(matches!(&err, SyncError::Decode { path, .. } if path == "/search/issues"));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_watched_repos_follow_next_pages() {
        let (client, transport) = client(vec![
            RawResponse {
                has_next: true,
                ..RawResponse::ok(r#"[{"full_name":"a/one"}]"#)
            },
            RawResponse::ok(r#"[{"full_name":"b/two"}]"#),
        ]);
        let repos = client.watched_repos().await.unwrap();
        assert_eq!(repos, vec!["a/one", "b/two"]);
        assert_eq!(transport.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_user_teams_format() {
        let (client, _) = client(vec![RawResponse::ok(
            r#"[{"slug":"core","organization":{"login":"acme"}}]"#,
        )]);
        assert_eq!(client.user_teams().await.unwrap(), vec!["acme/core"]);
    }

    #[test]
    fn test_parse_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("30"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert!(parse_rate_limit(&headers).is_none());

        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
        let rl = parse_rate_limit(&headers).unwrap();
        assert_eq!((rl.limit, rl.remaining), (30, 0));
        assert_eq!(rl.reset.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_next_link_detection() {
        assert!(has_next_link(
            r#"<https://api.github.com/user/subscriptions?page=2>; rel="next", <https://api.github.com/user/subscriptions?page=5>; rel="last""#
        ));
        assert!(!has_next_link(
            r#"<https://api.github.com/user/subscriptions?page=1>; rel="prev""#
        ));
    }

    #[test]
    fn test_clients_get_distinct_owners() {
        let pipeline = RequestPipeline::new(SharedConfig::default());
        let transport: Arc<dyn Transport> = Arc::new(Scripted::default());
        let a = GitHubClient::new(transport.clone(), pipeline.clone());
        let b = GitHubClient::new(transport, pipeline);
        assert_ne!(a.owner(), b.owner());
        assert!(a.owner().starts_with("github-client:"));
    }
}
