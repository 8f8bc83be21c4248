//! `SQLite` storage implementation.

use crate::error::{Result, SyncError};
use crate::model::{Issue, StreamRecord, Subscription};
use crate::query::FilterQuery;
use crate::storage::schema::apply_schema;
use crate::util::parse_api_path;
use crate::util::time::{format_timestamp, now_utc, parse_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Column list matching [`SqliteStorage::issue_from_row`].
pub(crate) const ISSUE_COLUMNS: &str = "id, type, title, created_at, updated_at, closed_at, \
     read_at, prev_read_at, archived_at, marked_at, number, user, repo, author, \
     assignees, labels, milestone, due_on, html_url, body, value, merged_at";

const STREAM_COLUMNS: &str = "id, name, queries, position, enabled, searched_at";

/// SQLite-based storage backend.
///
/// Owned by the scheduler task; every mutation of the cache goes through one
/// instance.
#[derive(Debug)]
pub struct SqliteStorage {
    pub(crate) conn: Connection,
}

impl SqliteStorage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Run `f` inside an immediate transaction, committing on success.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or a database error; the transaction is
    /// rolled back in both cases.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        debug!(op, "committed");
        Ok(result)
    }

    // ========================================================================
    // STREAMS
    // ========================================================================

    /// All streams, system streams first, then by position.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_streams(&self) -> Result<Vec<StreamRecord>> {
        let sql = format!("SELECT {STREAM_COLUMNS} FROM streams ORDER BY position, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let streams = stmt
            .query_map([], stream_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(streams)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_stream(&self, id: i64) -> Result<Option<StreamRecord>> {
        let sql = format!("SELECT {STREAM_COLUMNS} FROM streams WHERE id = ?");
        let stream = self
            .conn
            .query_row(&sql, [id], stream_from_row)
            .optional()?;
        Ok(stream)
    }

    /// Create a user stream. Ids and default positions continue after the
    /// current maximum.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty name or query list, or a
    /// database error.
    pub fn create_stream(
        &mut self,
        name: &str,
        queries: &[String],
        position: Option<i64>,
    ) -> Result<StreamRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::validation("name", "cannot be empty"));
        }
        let queries: Vec<String> = queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return Err(SyncError::validation("queries", "at least one query is required"));
        }
        let queries_json = serde_json::to_string(&queries)?;

        let id = self.mutate("create_stream", |tx| {
            let next_id: i64 = tx.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM streams WHERE id > 0",
                [],
                |row| row.get(0),
            )?;
            let position = match position {
                Some(p) => p,
                None => tx.query_row(
                    "SELECT COALESCE(MAX(position), -1) + 1 FROM streams WHERE id > 0",
                    [],
                    |row| row.get(0),
                )?,
            };
            let now = format_timestamp(&now_utc());
            tx.execute(
                "INSERT INTO streams (id, name, queries, position, enabled, created_at, updated_at)
                 VALUES (?, ?, ?, ?, 1, ?, ?)",
                rusqlite::params![next_id, name, queries_json, position, now, now],
            )?;
            Ok(next_id)
        })?;

        self.get_stream(id)?
            .ok_or(SyncError::StreamNotFound { id })
    }

    /// Replace a stream's query list. Returns false if the stream is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn update_stream_queries(&mut self, id: i64, queries: &[String]) -> Result<bool> {
        let queries_json = serde_json::to_string(queries)?;
        let count = self.conn.execute(
            "UPDATE streams SET queries = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![queries_json, format_timestamp(&now_utc()), id],
        )?;
        Ok(count > 0)
    }

    /// # Errors
    ///
    /// Returns `StreamNotFound` if no row was updated.
    pub fn set_stream_enabled(&mut self, id: i64, enabled: bool) -> Result<()> {
        let count = self.conn.execute(
            "UPDATE streams SET enabled = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![enabled, format_timestamp(&now_utc()), id],
        )?;
        if count == 0 {
            return Err(SyncError::StreamNotFound { id });
        }
        Ok(())
    }

    /// Persist a stream's watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn update_searched_at(&mut self, id: i64, searched_at: &DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE streams SET searched_at = ? WHERE id = ?",
            rusqlite::params![format_timestamp(searched_at), id],
        )?;
        Ok(())
    }

    /// Delete a user stream, its links, and every issue no longer linked to
    /// any stream. Returns the number of issues removed.
    ///
    /// # Errors
    ///
    /// Returns a validation error for system streams, `StreamNotFound` for a
    /// missing id, or a database error.
    pub fn delete_stream(&mut self, id: i64) -> Result<usize> {
        if id <= 0 {
            return Err(SyncError::validation("stream", "system streams cannot be deleted"));
        }
        self.mutate("delete_stream", |tx| {
            let count = tx.execute("DELETE FROM streams WHERE id = ?", [id])?;
            if count == 0 {
                return Err(SyncError::StreamNotFound { id });
            }
            tx.execute("DELETE FROM streams_issues WHERE stream_id = ?", [id])?;
            let removed = tx.execute(
                "DELETE FROM issues WHERE id NOT IN (SELECT issue_id FROM streams_issues)",
                [],
            )?;
            Ok(removed)
        })
    }

    // ========================================================================
    // ISSUES
    // ========================================================================

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?");
        let issue = self
            .conn
            .query_row(&sql, [id], issue_from_row)
            .optional()?;
        Ok(issue)
    }

    /// Fetch several issues; missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issues(&self, ids: &[i64]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let issues = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    /// List cached issues through the filter DSL.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>> {
        let compiled = FilterQuery::parse(query.filter.as_deref().unwrap_or_default()).compile();

        let mut sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE {}",
            compiled.where_clause()
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = compiled
            .params
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn rusqlite::ToSql>)
            .collect();

        if let Some(stream_id) = query.stream_id {
            sql.push_str(" AND id IN (SELECT issue_id FROM streams_issues WHERE stream_id = ?)");
            params.push(Box::new(stream_id));
        }

        let _ = write!(sql, " ORDER BY {}", compiled.sort);

        if let Some(limit) = query.limit {
            if limit > 0 {
                sql.push_str(" LIMIT ?");
                params.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
                if let Some(offset) = query.offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Box::new(i64::try_from(offset).unwrap_or(0)));
                }
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let issues = stmt
            .query_map(params_refs.as_slice(), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_issues(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM issues", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Distinct issues linked to any stream that are unread and not archived.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn unread_count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT count(DISTINCT i.id) FROM issues i
             INNER JOIN streams_issues s ON s.issue_id = i.id
             WHERE (i.read_at IS NULL OR i.read_at < i.updated_at)
               AND i.archived_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Mark an issue read at `at`, remembering the previous read marker.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is not cached.
    pub fn mark_read(&mut self, id: i64, at: &DateTime<Utc>) -> Result<Issue> {
        self.update_local(
            id,
            "UPDATE issues SET prev_read_at = read_at, read_at = ? WHERE id = ?",
            Some(format_timestamp(at)),
        )
    }

    /// Undo the last read: restore the previous read marker.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is not cached.
    pub fn mark_unread(&mut self, id: i64) -> Result<Issue> {
        self.update_local(
            id,
            "UPDATE issues SET read_at = prev_read_at, prev_read_at = NULL WHERE id = ?",
            None::<String>,
        )
    }

    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is not cached.
    pub fn set_starred(&mut self, id: i64, starred: bool) -> Result<Issue> {
        let value = starred.then(|| format_timestamp(&now_utc()));
        self.update_local(id, "UPDATE issues SET marked_at = ? WHERE id = ?", Some(value))
    }

    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is not cached.
    pub fn set_archived(&mut self, id: i64, archived: bool) -> Result<Issue> {
        let value = archived.then(|| format_timestamp(&now_utc()));
        self.update_local(id, "UPDATE issues SET archived_at = ? WHERE id = ?", Some(value))
    }

    /// Record the merge time reported by the pulls endpoint.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is not cached.
    pub fn update_merged(&mut self, id: i64, merged_at: &DateTime<Utc>) -> Result<Issue> {
        self.update_local(
            id,
            "UPDATE issues SET merged_at = ? WHERE id = ?",
            Some(format_timestamp(merged_at)),
        )
    }

    /// Run a local-state update whose last parameter is the issue id.
    fn update_local<V: rusqlite::ToSql>(
        &mut self,
        id: i64,
        sql: &str,
        value: Option<V>,
    ) -> Result<Issue> {
        let count = match value {
            Some(value) => self.conn.execute(sql, rusqlite::params![value, id])?,
            None => self.conn.execute(sql, [id])?,
        };
        if count == 0 {
            return Err(SyncError::IssueNotFound { id });
        }
        self.get_issue(id)?.ok_or(SyncError::IssueNotFound { id })
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Subscribe to an issue by its API url.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the url has no owner/repo/number path.
    pub fn subscribe(&mut self, issue_id: i64, url: &str) -> Result<Subscription> {
        let path = parse_api_path(url)
            .ok_or_else(|| SyncError::validation("url", format!("not an issue url: {url}")))?;
        let created_at = now_utc();
        self.conn.execute(
            "INSERT OR REPLACE INTO subscription_issues (issue_id, url, repo, created_at)
             VALUES (?, ?, ?, ?)",
            rusqlite::params![issue_id, url, path.repo(), format_timestamp(&created_at)],
        )?;
        Ok(Subscription {
            issue_id,
            url: url.to_string(),
            repo: path.repo(),
            created_at,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn unsubscribe(&mut self, issue_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM subscription_issues WHERE issue_id = ?", [issue_id])?;
        Ok(count > 0)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, url, repo, created_at FROM subscription_issues ORDER BY created_at, issue_id",
        )?;
        let subs = stmt
            .query_map([], |row| {
                Ok(Subscription {
                    issue_id: row.get(0)?,
                    url: row.get(1)?,
                    repo: row.get(2)?,
                    created_at: timestamp_at(row, 3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    // ========================================================================
    // CONFIG
    // ========================================================================

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_config(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let map = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(map)
    }

    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn delete_config(&mut self, key: &str) -> Result<bool> {
        let count = self.conn.execute("DELETE FROM config WHERE key = ?", [key])?;
        Ok(count > 0)
    }
}

/// Options for [`SqliteStorage::list_issues`].
#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
    /// Filter DSL string.
    pub filter: Option<String>,
    /// Restrict to issues linked to this stream.
    pub stream_id: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn conversion_error(idx: usize, err: SyncError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn optional_timestamp_at(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .filter(|raw| !raw.is_empty())
        .map(|raw| parse_timestamp(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Map a row selected with [`ISSUE_COLUMNS`].
pub(crate) fn issue_from_row(row: &Row) -> rusqlite::Result<Issue> {
    let issue_type = row
        .get::<_, String>(1)?
        .parse()
        .map_err(|e| conversion_error(1, e))?;

    Ok(Issue {
        id: row.get(0)?,
        issue_type,
        title: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
        updated_at: timestamp_at(row, 4)?,
        closed_at: optional_timestamp_at(row, 5)?,
        merged_at: optional_timestamp_at(row, 21)?,
        read_at: optional_timestamp_at(row, 6)?,
        prev_read_at: optional_timestamp_at(row, 7)?,
        archived_at: optional_timestamp_at(row, 8)?,
        marked_at: optional_timestamp_at(row, 9)?,
        number: row.get(10)?,
        user: row.get(11)?,
        repo: row.get(12)?,
        author: row.get(13)?,
        assignees: row.get(14)?,
        labels: row.get(15)?,
        milestone: row.get(16)?,
        due_on: row.get(17)?,
        html_url: row.get(18)?,
        body: row.get(19)?,
        value: row.get(20)?,
    })
}

fn stream_from_row(row: &Row) -> rusqlite::Result<StreamRecord> {
    let raw_queries: String = row.get(2)?;
    let queries: Vec<String> = serde_json::from_str(&raw_queries)
        .map_err(|e| conversion_error(2, SyncError::Json(e)))?;
    Ok(StreamRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        queries,
        position: row.get(3)?,
        enabled: row.get(4)?,
        searched_at: optional_timestamp_at(row, 5)?,
    })
}

#[cfg(test)]
impl SqliteStorage {
    /// Execute raw SQL for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub fn execute_test_sql(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
