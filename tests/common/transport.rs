//! Scripted [`Transport`] that records every request.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use streamsync::config::SharedConfig;
use streamsync::error::{Result, SyncError};
use streamsync::remote::{GitHubClient, RawResponse, RequestPipeline, Transport};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub at: Instant,
}

impl Call {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Responses are queued per path and served in order. A path with nothing
/// queued fails with a 404 API error.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, VecDeque<RawResponse>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, response: RawResponse) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn respond_ok(&self, path: &str, body: impl Into<String>) {
        self.respond(path, RawResponse::ok(body));
    }

    pub fn respond_status(&self, path: &str, status: u16) {
        self.respond(
            path,
            RawResponse {
                status,
                rate_limit: None,
                has_next: false,
                body: format!("{{\"message\":\"status {status}\"}}"),
            },
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    /// Client on a fresh, started pipeline.
    pub fn client(self: &Arc<Self>, config: SharedConfig) -> GitHubClient {
        let pipeline = RequestPipeline::new(config);
        pipeline.start();
        GitHubClient::new(Arc::clone(self) as Arc<dyn Transport>, pipeline)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse> {
        self.calls.lock().push(Call {
            path: path.to_string(),
            query: query.to_vec(),
            at: Instant::now(),
        });
        let next = self
            .responses
            .lock()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        next.ok_or_else(|| SyncError::api(404, format!("no scripted response for {path}")))
    }
}
