//! Core data types for `streamsync`.
//!
//! - `Issue` - a cached issue or pull request row
//! - `IssueType` - issue vs pull request
//! - `StreamRecord` / `StreamKind` - persisted stream definitions
//! - `RemoteIssue` and friends - payloads returned by the remote API

use crate::error::SyncError;
use crate::util::time::canonical;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix and suffix wrapped around each name in serialized list columns.
const LIST_OPEN: &str = "<<<<";
const LIST_CLOSE: &str = ">>>>";

/// Serialize names as `<<<<a>>>><<<<b>>>>`, or `None` for an empty list.
#[must_use]
pub fn serialize_names<I, S>(names: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for name in names {
        out.push_str(LIST_OPEN);
        out.push_str(name.as_ref());
        out.push_str(LIST_CLOSE);
    }
    if out.is_empty() { None } else { Some(out) }
}

/// Wrap a single name the way [`serialize_names`] does.
#[must_use]
pub fn serialized_name(name: &str) -> String {
    format!("{LIST_OPEN}{name}{LIST_CLOSE}")
}

/// Issue or pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    #[default]
    Issue,
    Pr,
}

impl IssueType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Pr => "pr",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "issue" => Ok(Self::Issue),
            "pr" | "pull_request" => Ok(Self::Pr),
            other => Err(SyncError::validation("type", format!("unknown issue type: {other}"))),
        }
    }
}

/// A cached issue row.
///
/// `read_at`, `prev_read_at`, `marked_at` and `archived_at` are local-only and
/// never written by an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub title: String,
    #[serde(with = "canonical")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "canonical")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "canonical::option")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Set by the merge check; search payloads do not carry it.
    #[serde(with = "canonical::option")]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(with = "canonical::option")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(with = "canonical::option")]
    pub prev_read_at: Option<DateTime<Utc>>,
    #[serde(with = "canonical::option")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(with = "canonical::option")]
    pub marked_at: Option<DateTime<Utc>>,
    pub number: i64,
    pub user: String,
    pub repo: String,
    pub author: String,
    pub assignees: Option<String>,
    pub labels: Option<String>,
    pub milestone: Option<String>,
    pub due_on: Option<String>,
    pub html_url: String,
    pub body: Option<String>,
    #[serde(skip)]
    pub value: String,
}

impl Issue {
    /// Unread when never read, or updated after the last read.
    #[must_use]
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none_or(|read_at| read_at < self.updated_at)
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    #[must_use]
    pub const fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }

    /// Case-insensitive membership test against the serialized assignees.
    #[must_use]
    pub fn has_assignee(&self, name: &str) -> bool {
        contains_name(self.assignees.as_deref(), name)
    }

    /// Case-insensitive membership test against the serialized labels.
    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        contains_name(self.labels.as_deref(), name)
    }
}

fn contains_name(serialized: Option<&str>, name: &str) -> bool {
    serialized.is_some_and(|list| {
        list.to_lowercase()
            .contains(&serialized_name(&name.to_lowercase()))
    })
}

/// Which built-in behavior a stream id selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Custom,
    Me,
    Team,
    Watching,
    Subscription,
}

impl StreamKind {
    pub const ME_ID: i64 = -1;
    pub const TEAM_ID: i64 = -2;
    pub const WATCHING_ID: i64 = -3;
    pub const SUBSCRIPTION_ID: i64 = -4;

    /// Resolve a stream id. Positive ids are user streams.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSystemStream` for a non-positive id that is not built in.
    pub const fn from_id(id: i64) -> Result<Self, SyncError> {
        match id {
            Self::ME_ID => Ok(Self::Me),
            Self::TEAM_ID => Ok(Self::Team),
            Self::WATCHING_ID => Ok(Self::Watching),
            Self::SUBSCRIPTION_ID => Ok(Self::Subscription),
            id if id > 0 => Ok(Self::Custom),
            id => Err(SyncError::UnknownSystemStream { id }),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Me => "me",
            Self::Team => "team",
            Self::Watching => "watching",
            Self::Subscription => "subscription",
        }
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        !matches!(self, Self::Custom)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted stream definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub id: i64,
    pub name: String,
    pub queries: Vec<String>,
    pub position: i64,
    pub enabled: bool,
    #[serde(with = "canonical::option")]
    pub searched_at: Option<DateTime<Utc>>,
}

impl StreamRecord {
    /// # Errors
    ///
    /// See [`StreamKind::from_id`].
    pub const fn kind(&self) -> Result<StreamKind, SyncError> {
        StreamKind::from_id(self.id)
    }
}

/// A manually subscribed issue, backing the subscription stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub issue_id: i64,
    pub url: String,
    pub repo: String,
    #[serde(with = "canonical")]
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// REMOTE PAYLOADS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLabel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMilestone {
    pub title: String,
    #[serde(default)]
    pub due_on: Option<String>,
}

/// Marker present on search items that are pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePullRef {
    pub url: String,
}

/// One item of a search response.
///
/// Fields not modeled here are kept in `extra` so the raw payload survives
/// a round trip into the `value` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub url: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub user: RemoteUser,
    #[serde(default)]
    pub assignee: Option<RemoteUser>,
    #[serde(default)]
    pub assignees: Option<Vec<RemoteUser>>,
    #[serde(default)]
    pub labels: Vec<RemoteLabel>,
    #[serde(default)]
    pub milestone: Option<RemoteMilestone>,
    #[serde(default)]
    pub pull_request: Option<RemotePullRef>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RemoteIssue {
    #[must_use]
    pub const fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    #[must_use]
    pub const fn issue_type(&self) -> IssueType {
        if self.is_pull_request() {
            IssueType::Pr
        } else {
            IssueType::Issue
        }
    }

    /// Assignee logins, falling back to the legacy single `assignee`.
    #[must_use]
    pub fn assignee_logins(&self) -> Vec<&str> {
        match (&self.assignees, &self.assignee) {
            (Some(list), _) => list.iter().map(|u| u.login.as_str()).collect(),
            (None, Some(single)) => vec![single.login.as_str()],
            (None, None) => Vec::new(),
        }
    }
}

/// Search endpoint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<RemoteIssue>,
}

/// Subset of a pull request payload used for staleness correction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemotePull {
    pub number: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteOrganization {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTeam {
    pub slug: String,
    pub organization: RemoteOrganization,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteRepo {
    pub full_name: String,
}
