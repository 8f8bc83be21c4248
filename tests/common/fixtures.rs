//! Remote payload builders.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use streamsync::config::SyncConfig;
use streamsync::model::{
    RemoteIssue, RemoteLabel, RemoteMilestone, RemotePullRef, RemoteUser, SearchResult,
};
use std::time::Duration;

/// 2024-05-01 at `hour:minute` UTC.
pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

/// Open issue `acme/widgets#number` with the given id.
pub fn issue(id: i64, number: i64) -> RemoteIssueBuilder {
    RemoteIssueBuilder::new(id, "acme/widgets", number)
}

pub struct RemoteIssueBuilder {
    issue: RemoteIssue,
}

impl RemoteIssueBuilder {
    pub fn new(id: i64, repo: &str, number: i64) -> Self {
        Self {
            issue: RemoteIssue {
                id,
                number,
                title: format!("Issue {number}"),
                body: None,
                url: format!("https://api.github.com/repos/{repo}/issues/{number}"),
                html_url: format!("https://github.com/{repo}/issues/{number}"),
                created_at: ts(8, 0),
                updated_at: ts(9, 0),
                closed_at: None,
                user: RemoteUser {
                    login: "alice".to_string(),
                },
                assignee: None,
                assignees: Some(Vec::new()),
                labels: Vec::new(),
                milestone: None,
                pull_request: None,
                extra: serde_json::Map::new(),
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.issue.title = title.to_string();
        self
    }

    pub fn author(mut self, login: &str) -> Self {
        self.issue.user = RemoteUser {
            login: login.to_string(),
        };
        self
    }

    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.issue.updated_at = at;
        self
    }

    pub fn closed(mut self, at: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(at);
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.issue.labels = labels
            .iter()
            .map(|name| RemoteLabel {
                name: (*name).to_string(),
            })
            .collect();
        self
    }

    pub fn assignees(mut self, logins: &[&str]) -> Self {
        self.issue.assignees = Some(
            logins
                .iter()
                .map(|login| RemoteUser {
                    login: (*login).to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn milestone(mut self, title: &str) -> Self {
        self.issue.milestone = Some(RemoteMilestone {
            title: title.to_string(),
            due_on: None,
        });
        self
    }

    /// Turn the item into a pull request search hit.
    pub fn pull_request(mut self) -> Self {
        let pulls_url = self.issue.url.replace("/issues/", "/pulls/");
        self.issue.pull_request = Some(RemotePullRef { url: pulls_url });
        self
    }

    pub fn build(self) -> RemoteIssue {
        self.issue
    }
}

/// JSON body of a search response.
pub fn search_body(total_count: u64, items: &[RemoteIssue]) -> String {
    serde_json::to_string(&SearchResult {
        total_count,
        items: items.to_vec(),
    })
    .unwrap()
}

/// JSON body of a pulls endpoint response.
pub fn pull_body(number: i64, updated_at: DateTime<Utc>) -> String {
    json!({ "number": number, "updated_at": updated_at, "merged_at": null }).to_string()
}

/// Pulls endpoint response for a merged pull request.
pub fn merged_pull_body(number: i64, updated_at: DateTime<Utc>, merged_at: DateTime<Utc>) -> String {
    json!({ "number": number, "updated_at": updated_at, "merged_at": merged_at }).to_string()
}

/// Configuration with no pauses and a fixed login.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        login: Some("me".to_string()),
        poll_interval: Duration::from_millis(10),
        api_interval: Duration::ZERO,
        staleness_delay: Duration::ZERO,
        ..SyncConfig::default()
    }
}

/// [`fast_config`] against a GitHub Enterprise host.
pub fn enterprise_config() -> SyncConfig {
    SyncConfig {
        host: "ghe.example.com".to_string(),
        path_prefix: "api/v3".to_string(),
        ..fast_config()
    }
}
