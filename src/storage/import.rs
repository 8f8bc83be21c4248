//! Importing search results into the issue cache.
//!
//! Remote-origin columns are overwritten on every import; the local-only
//! columns (`read_at`, `prev_read_at`, `marked_at`, `archived_at`) are only
//! set when a row is first inserted. `merged_at` is left to the merge check.

use crate::error::Result;
use crate::model::{RemoteIssue, serialize_names};
use crate::storage::SqliteStorage;
use crate::util::parse_api_path;
use crate::util::time::format_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Transaction};
use tracing::{debug, info, warn};

/// Upper bound on the number of cached issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_issues: usize,
    /// Rows deleted per eviction round.
    pub eviction_batch: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_issues: 10_000,
            eviction_batch: 1_000,
        }
    }
}

/// Result of [`SqliteStorage::import_issues`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Ids that are new (and unread) or whose `updated_at` moved forward.
    pub updated_ids: Vec<i64>,
    /// Closed pull requests among `updated_ids` with no merge time yet.
    pub closed_pr_ids: Vec<i64>,
    /// Rows removed by eviction.
    pub evicted: usize,
}

impl SqliteStorage {
    /// Upsert a batch of remote issues, then evict down to `limits`.
    ///
    /// New rows get `read_at = default_read_at`; they are only reported as
    /// updated when that is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the whole batch is rolled back.
    pub fn import_issues(
        &mut self,
        issues: &[RemoteIssue],
        default_read_at: Option<DateTime<Utc>>,
        limits: &CacheLimits,
    ) -> Result<ImportOutcome> {
        let default_read_at = default_read_at.map(|at| format_timestamp(&at));

        self.mutate("import_issues", |tx| {
            let mut outcome = ImportOutcome::default();
            for issue in issues {
                let Some(row) = ImportRow::from_remote(issue)? else {
                    warn!(id = issue.id, url = %issue.url, "Skipping issue without repository path");
                    continue;
                };

                let existing: Option<(String, Option<String>)> = tx
                    .query_row(
                        "SELECT updated_at, merged_at FROM issues WHERE id = ?",
                        [issue.id],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;

                let (updated, merged) = match existing {
                    Some((previous, merged_at)) => {
                        update_remote_columns(tx, &row)?;
                        (row.updated_at > previous, merged_at.is_some())
                    }
                    None => {
                        insert_row(tx, &row, default_read_at.as_deref())?;
                        (default_read_at.is_none(), false)
                    }
                };
                if updated {
                    outcome.updated_ids.push(issue.id);
                    if issue.is_pull_request() && row.closed_at.is_some() && !merged {
                        outcome.closed_pr_ids.push(issue.id);
                    }
                }
            }

            outcome.evicted = evict(tx, limits)?;
            Ok(outcome)
        })
    }
}

/// Column values derived from one remote payload.
struct ImportRow<'a> {
    id: i64,
    issue_type: &'static str,
    title: &'a str,
    created_at: String,
    updated_at: String,
    closed_at: Option<String>,
    number: i64,
    user: String,
    repo: String,
    author: &'a str,
    assignees: Option<String>,
    labels: Option<String>,
    milestone: Option<&'a str>,
    due_on: Option<&'a str>,
    html_url: &'a str,
    body: Option<&'a str>,
    value: String,
}

impl<'a> ImportRow<'a> {
    fn from_remote(issue: &'a RemoteIssue) -> Result<Option<Self>> {
        let Some(path) = parse_api_path(&issue.url) else {
            return Ok(None);
        };
        Ok(Some(Self {
            id: issue.id,
            issue_type: issue.issue_type().as_str(),
            title: &issue.title,
            created_at: format_timestamp(&issue.created_at),
            updated_at: format_timestamp(&issue.updated_at),
            closed_at: issue.closed_at.as_ref().map(format_timestamp),
            number: issue.number,
            repo: path.repo(),
            user: path.owner,
            author: &issue.user.login,
            assignees: serialize_names(issue.assignee_logins()),
            labels: serialize_names(issue.labels.iter().map(|l| l.name.as_str())),
            milestone: issue.milestone.as_ref().map(|m| m.title.as_str()),
            due_on: issue.milestone.as_ref().and_then(|m| m.due_on.as_deref()),
            html_url: &issue.html_url,
            body: issue.body.as_deref(),
            value: serde_json::to_string(issue)?,
        }))
    }
}

fn update_remote_columns(tx: &Transaction, row: &ImportRow) -> Result<()> {
    tx.execute(
        "UPDATE issues SET
            type = ?, title = ?, created_at = ?, updated_at = ?, closed_at = ?,
            number = ?, user = ?, repo = ?, author = ?, assignees = ?, labels = ?,
            milestone = ?, due_on = ?, html_url = ?, body = ?, value = ?
         WHERE id = ?",
        rusqlite::params![
            row.issue_type,
            row.title,
            row.created_at,
            row.updated_at,
            row.closed_at,
            row.number,
            row.user,
            row.repo,
            row.author,
            row.assignees,
            row.labels,
            row.milestone,
            row.due_on,
            row.html_url,
            row.body,
            row.value,
            row.id,
        ],
    )?;
    Ok(())
}

fn insert_row(tx: &Transaction, row: &ImportRow, read_at: Option<&str>) -> Result<()> {
    tx.execute(
        "INSERT INTO issues (
            id, type, title, created_at, updated_at, closed_at, read_at,
            number, user, repo, author, assignees, labels, milestone, due_on,
            html_url, body, value
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            row.id,
            row.issue_type,
            row.title,
            row.created_at,
            row.updated_at,
            row.closed_at,
            read_at,
            row.number,
            row.user,
            row.repo,
            row.author,
            row.assignees,
            row.labels,
            row.milestone,
            row.due_on,
            row.html_url,
            row.body,
            row.value,
        ],
    )?;
    Ok(())
}

/// Delete the oldest rows (by `updated_at`) until the cache fits, then drop
/// links pointing at removed issues.
fn evict(tx: &Transaction, limits: &CacheLimits) -> Result<usize> {
    let batch = limits.eviction_batch.max(1);
    let mut evicted = 0;
    loop {
        let count: i64 = tx.query_row("SELECT count(*) FROM issues", [], |r| r.get(0))?;
        let count = usize::try_from(count).unwrap_or(0);
        if count <= limits.max_issues {
            break;
        }
        let excess = (count - limits.max_issues).min(batch);
        let removed = tx.execute(
            "DELETE FROM issues WHERE id IN (
                SELECT id FROM issues ORDER BY updated_at ASC, id ASC LIMIT ?
             )",
            [i64::try_from(excess).unwrap_or(i64::MAX)],
        )?;
        if removed == 0 {
            break;
        }
        evicted += removed;
    }

    if evicted > 0 {
        let orphans = tx.execute(
            "DELETE FROM streams_issues WHERE issue_id NOT IN (SELECT id FROM issues)",
            [],
        )?;
        info!(evicted, orphans, "Evicted old issues");
    } else {
        debug!("No eviction needed");
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RemoteLabel, RemoteUser};
    use chrono::{Duration, TimeZone};

    fn remote(id: i64, updated_minutes: i64) -> RemoteIssue {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        RemoteIssue {
            id,
            number: id,
            title: format!("Issue {id}"),
            body: None,
            url: format!("https://api.github.com/repos/acme/widgets/issues/{id}"),
            html_url: format!("https://github.com/acme/widgets/issues/{id}"),
            created_at: base,
            updated_at: base + Duration::minutes(updated_minutes),
            closed_at: None,
            user: RemoteUser {
                login: "alice".to_string(),
            },
            assignee: Some(RemoteUser {
                login: "bob".to_string(),
            }),
            assignees: None,
            labels: vec![RemoteLabel {
                name: "bug".to_string(),
            }],
            milestone: None,
            pull_request: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_import_derives_columns() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let outcome = storage
            .import_issues(&[remote(7, 0)], None, &CacheLimits::default())
            .unwrap();
        assert_eq!(outcome.updated_ids, vec![7]);

        let issue = storage.get_issue(7).unwrap().unwrap();
        assert_eq!(issue.user, "acme");
        assert_eq!(issue.repo, "acme/widgets");
        assert_eq!(issue.author, "alice");
        assert_eq!(issue.assignees.as_deref(), Some("<<<<bob>>>>"));
        assert_eq!(issue.labels.as_deref(), Some("<<<<bug>>>>"));
        assert!(issue.read_at.is_none());
        let raw: serde_json::Value = serde_json::from_str(&issue.value).unwrap();
        assert_eq!(raw["number"], 7);
    }

    #[test]
    fn test_reimport_reports_only_newer_updates() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let limits = CacheLimits::default();
        storage.import_issues(&[remote(1, 0)], None, &limits).unwrap();

        let same = storage.import_issues(&[remote(1, 0)], None, &limits).unwrap();
        assert!(same.updated_ids.is_empty());

        let newer = storage.import_issues(&[remote(1, 5)], None, &limits).unwrap();
        assert_eq!(newer.updated_ids, vec![1]);
    }

    #[test]
    fn test_default_read_at_suppresses_report() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let read = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let outcome = storage
            .import_issues(&[remote(3, 0)], Some(read), &CacheLimits::default())
            .unwrap();
        assert!(outcome.updated_ids.is_empty());
        assert_eq!(storage.get_issue(3).unwrap().unwrap().read_at, Some(read));
    }

    #[test]
    fn test_closed_pull_requests_are_reported_until_merged() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let limits = CacheLimits::default();
        let closed_pr = |minutes: i64| {
            let mut pr = remote(8, minutes);
            pr.closed_at = Some(pr.updated_at);
            pr.pull_request = Some(crate::model::RemotePullRef {
                url: "https://api.github.com/repos/acme/widgets/pulls/8".to_string(),
            });
            pr
        };
        let mut closed_issue = remote(9, 0);
        closed_issue.closed_at = Some(closed_issue.updated_at);

        let first = storage
            .import_issues(&[closed_pr(0), closed_issue, remote(10, 0)], None, &limits)
            .unwrap();
        assert_eq!(first.closed_pr_ids, vec![8]);

        let unchanged = storage.import_issues(&[closed_pr(0)], None, &limits).unwrap();
        assert!(unchanged.closed_pr_ids.is_empty());

        let merged_at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        storage.update_merged(8, &merged_at).unwrap();
        let touched = storage.import_issues(&[closed_pr(30)], None, &limits).unwrap();
        assert_eq!(touched.updated_ids, vec![8]);
        assert!(touched.closed_pr_ids.is_empty());
        assert_eq!(storage.get_issue(8).unwrap().unwrap().merged_at, Some(merged_at));
    }

    #[test]
    fn test_missing_api_path_is_skipped() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut issue = remote(4, 0);
        issue.url = "not-a-url".to_string();
        let outcome = storage
            .import_issues(&[issue], None, &CacheLimits::default())
            .unwrap();
        assert!(outcome.updated_ids.is_empty());
        assert_eq!(storage.count_issues().unwrap(), 0);
    }

    #[test]
    fn test_eviction_removes_oldest_in_batches() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let limits = CacheLimits {
            max_issues: 3,
            eviction_batch: 1,
        };
        let batch: Vec<RemoteIssue> = (1..=6).map(|id| remote(id, id)).collect();
        let outcome = storage.import_issues(&batch, None, &limits).unwrap();
        assert_eq!(outcome.evicted, 3);
        assert_eq!(storage.count_issues().unwrap(), 3);
        for id in 1..=3 {
            assert!(storage.get_issue(id).unwrap().is_none());
        }
        assert!(storage.get_issue(6).unwrap().is_some());
    }
}
