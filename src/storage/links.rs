//! Stream membership: linking imported issues to a stream and unlinking
//! issues that no longer match any query of a stream they belong to.

use crate::error::Result;
use crate::model::Issue;
use crate::query::FilterQuery;
use crate::storage::SqliteStorage;
use crate::storage::sqlite::{ISSUE_COLUMNS, issue_from_row};
use rusqlite::Transaction;
use std::collections::HashMap;
use tracing::info;

/// Result of [`SqliteStorage::link_and_reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Links newly created for the batch.
    pub linked: usize,
    /// `(stream_id, issue_id)` pairs removed because the issue failed every
    /// query of that stream.
    pub unlinked: Vec<(i64, i64)>,
}

impl SqliteStorage {
    /// Link `issue_ids` to `stream_id`, then re-check every stream that
    /// already holds one of them.
    ///
    /// An issue stays linked to a stream as long as it matches at least one
    /// of the stream's queries.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails; nothing is committed in that case.
    pub fn link_and_reconcile(
        &mut self,
        stream_id: i64,
        issue_ids: &[i64],
    ) -> Result<ReconcileOutcome> {
        self.mutate("link_and_reconcile", |tx| {
            let mut outcome = ReconcileOutcome::default();
            for id in issue_ids {
                outcome.linked += tx.execute(
                    "INSERT OR IGNORE INTO streams_issues (stream_id, issue_id) VALUES (?, ?)",
                    [stream_id, *id],
                )?;
            }

            if !issue_ids.is_empty() {
                outcome.unlinked = unlink_mismatches(tx, issue_ids)?;
            }

            tx.execute(
                "DELETE FROM streams_issues WHERE issue_id NOT IN (SELECT id FROM issues)",
                [],
            )?;
            Ok(outcome)
        })
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_stream_links(&self, stream_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM streams_issues WHERE stream_id = ?",
            [stream_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Remove one link. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn unlink(&mut self, stream_id: i64, issue_id: i64) -> Result<bool> {
        let count = self.conn.execute(
            "DELETE FROM streams_issues WHERE stream_id = ? AND issue_id = ?",
            [stream_id, issue_id],
        )?;
        Ok(count > 0)
    }

    /// Ids of issues linked to a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn stream_issue_ids(&self, stream_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id FROM streams_issues WHERE stream_id = ? ORDER BY issue_id",
        )?;
        let ids = stmt
            .query_map([stream_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

fn unlink_mismatches(tx: &Transaction, batch: &[i64]) -> Result<Vec<(i64, i64)>> {
    let streams: Vec<(i64, String, String)> = {
        let mut stmt = tx.prepare("SELECT id, name, queries FROM streams ORDER BY position, id")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let placeholders = vec!["?"; batch.len()].join(",");
    let linked_sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN (
            SELECT issue_id FROM streams_issues
            WHERE stream_id = ? AND issue_id IN ({placeholders})
         )"
    );

    let mut unlinked = Vec::new();
    for (stream_id, name, raw_queries) in streams {
        let queries: Vec<String> = serde_json::from_str(&raw_queries)?;
        if queries.is_empty() {
            continue;
        }
        let filters: Vec<FilterQuery> = queries.iter().map(|q| FilterQuery::parse(q)).collect();

        let mut params: Vec<i64> = Vec::with_capacity(batch.len() + 1);
        params.push(stream_id);
        params.extend_from_slice(batch);
        let issues: Vec<Issue> = {
            let mut stmt = tx.prepare(&linked_sql)?;
            stmt.query_map(rusqlite::params_from_iter(params.iter()), issue_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        if issues.is_empty() {
            continue;
        }

        let mut mismatches: HashMap<i64, usize> = HashMap::new();
        for filter in &filters {
            for issue in &issues {
                if filter.is_mismatch(issue) {
                    *mismatches.entry(issue.id).or_default() += 1;
                }
            }
        }

        let stale: Vec<&Issue> = issues
            .iter()
            .filter(|issue| mismatches.get(&issue.id).copied() == Some(filters.len()))
            .collect();
        if stale.is_empty() {
            continue;
        }

        info!(
            stream = %name,
            queries = ?queries,
            titles = ?stale.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(),
            "unlink"
        );
        for issue in stale {
            tx.execute(
                "DELETE FROM streams_issues WHERE stream_id = ? AND issue_id = ?",
                [stream_id, issue.id],
            )?;
            unlinked.push((stream_id, issue.id));
        }
    }
    Ok(unlinked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;

    fn seed_issue(storage: &SqliteStorage, id: i64, closed: bool, labels: Option<&str>) {
        storage
            .conn
            .execute(
                "INSERT INTO issues (id, type, title, created_at, updated_at, closed_at, number,
                                     user, repo, author, labels, html_url, value)
                 VALUES (?, 'issue', ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', ?, ?,
                         'acme', 'acme/widgets', 'alice', ?, '', '{}')",
                rusqlite::params![
                    id,
                    format!("Issue {id}"),
                    closed.then_some("2024-01-02T00:00:00Z"),
                    id,
                    labels
                ],
            )
            .unwrap();
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let stream = storage
            .create_stream("s", &["is:issue".to_string()], None)
            .unwrap();
        seed_issue(&storage, 1, false, None);

        assert_eq!(storage.link_and_reconcile(stream.id, &[1]).unwrap().linked, 1);
        assert_eq!(storage.link_and_reconcile(stream.id, &[1]).unwrap().linked, 0);
        assert_eq!(storage.count_stream_links(stream.id).unwrap(), 1);
    }

    #[test]
    fn test_unlinks_issue_failing_every_query() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let stream = storage
            .create_stream(
                "mixed",
                &["is:open".to_string(), "label:urgent".to_string()],
                None,
            )
            .unwrap();
        seed_issue(&storage, 1, true, Some("<<<<urgent>>>>"));
        seed_issue(&storage, 2, true, None);
        seed_issue(&storage, 3, false, None);

        let outcome = storage.link_and_reconcile(stream.id, &[1, 2, 3]).unwrap();
        assert_eq!(outcome.unlinked, vec![(stream.id, 2)]);
        assert_eq!(storage.stream_issue_ids(stream.id).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_reconcile_touches_other_streams_holding_the_batch() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .update_stream_queries(StreamKind::ME_ID, &["is:open".to_string()])
            .unwrap();
        let custom = storage
            .create_stream("all", &["is:issue".to_string()], None)
            .unwrap();
        seed_issue(&storage, 5, false, None);
        storage.link_and_reconcile(StreamKind::ME_ID, &[5]).unwrap();

        storage
            .execute_test_sql("UPDATE issues SET closed_at = '2024-02-01T00:00:00Z' WHERE id = 5")
            .unwrap();
        let outcome = storage.link_and_reconcile(custom.id, &[5]).unwrap();
        assert_eq!(outcome.unlinked, vec![(StreamKind::ME_ID, 5)]);
        assert_eq!(storage.count_stream_links(custom.id).unwrap(), 1);
        assert_eq!(storage.count_stream_links(StreamKind::ME_ID).unwrap(), 0);
    }

    #[test]
    fn test_links_to_missing_issues_are_dropped() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let stream = storage.create_stream("s", &["x".to_string()], None).unwrap();
        let outcome = storage.link_and_reconcile(stream.id, &[404]).unwrap();
        assert_eq!(outcome.linked, 1);
        assert_eq!(storage.count_stream_links(stream.id).unwrap(), 0);
    }
}
