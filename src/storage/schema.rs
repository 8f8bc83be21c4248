//! Database schema definitions and migration logic.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// The complete SQL schema for the stream cache.
pub const SCHEMA_SQL: &str = r"
    -- Cached issues and pull requests.
    -- Timestamps are 'YYYY-MM-DDTHH:MM:SSZ' so string comparison is chronological.
    CREATE TABLE IF NOT EXISTS issues (
        id INTEGER PRIMARY KEY,
        type TEXT NOT NULL,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        closed_at TEXT,
        merged_at TEXT,
        read_at TEXT,
        prev_read_at TEXT,
        archived_at TEXT,
        marked_at TEXT,
        number INTEGER NOT NULL,
        user TEXT NOT NULL,
        repo TEXT NOT NULL,
        author TEXT NOT NULL,
        assignees TEXT,
        labels TEXT,
        milestone TEXT,
        due_on TEXT,
        html_url TEXT NOT NULL,
        body TEXT,
        value TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at);
    CREATE INDEX IF NOT EXISTS idx_issues_read_at ON issues(read_at);
    CREATE INDEX IF NOT EXISTS idx_issues_closed_at ON issues(closed_at);
    CREATE INDEX IF NOT EXISTS idx_issues_archived_at ON issues(archived_at);
    CREATE INDEX IF NOT EXISTS idx_issues_repo ON issues(repo);

    -- Streams: positive ids are user streams, negative ids are system streams.
    CREATE TABLE IF NOT EXISTS streams (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        queries TEXT NOT NULL DEFAULT '[]',
        position INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        searched_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_streams_position ON streams(position);

    -- Stream membership
    CREATE TABLE IF NOT EXISTS streams_issues (
        stream_id INTEGER NOT NULL,
        issue_id INTEGER NOT NULL,
        PRIMARY KEY (stream_id, issue_id),
        FOREIGN KEY (stream_id) REFERENCES streams(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_streams_issues_issue_id ON streams_issues(issue_id);

    -- Manually subscribed issues (backs the subscription stream)
    CREATE TABLE IF NOT EXISTS subscription_issues (
        issue_id INTEGER PRIMARY KEY,
        url TEXT NOT NULL,
        repo TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    -- Config (Runtime)
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Metadata
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Built-in system streams: (id, name, position).
pub const SYSTEM_STREAMS: &[(i64, &str, i64)] = &[
    (-1, "Me", -4),
    (-2, "Team", -3),
    (-3, "Watching", -2),
    (-4, "Subscription", -1),
];

/// Apply the schema to the database.
///
/// This uses `execute_batch` to run the entire DDL script.
/// It is idempotent because all statements use `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    run_migrations(conn)?;
    seed_system_streams(conn)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

/// Insert the system streams if they are missing. Existing rows keep their
/// `enabled` flag, queries and watermark.
fn seed_system_streams(conn: &Connection) -> Result<()> {
    let now = crate::util::time::format_timestamp(&crate::util::time::now_utc());
    for (id, name, position) in SYSTEM_STREAMS {
        conn.execute(
            "INSERT OR IGNORE INTO streams (id, name, queries, position, enabled, created_at, updated_at)
             VALUES (?, ?, '[]', ?, 1, ?, ?)",
            rusqlite::params![id, name, position, now, now],
        )?;
    }
    Ok(())
}

/// Run schema migrations for existing databases.
fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if version < CURRENT_SCHEMA_VERSION {
        // Caches written before `enabled` existed
        if !has_column(conn, "streams", "enabled") {
            conn.execute(
                "ALTER TABLE streams ADD COLUMN enabled INTEGER NOT NULL DEFAULT 1",
                [],
            )?;
        }

        // Caches written before the merge check
        if !has_column(conn, "issues", "merged_at") {
            conn.execute("ALTER TABLE issues ADD COLUMN merged_at TEXT", [])?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
            [CURRENT_SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> bool {
    conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")
        .and_then(|mut stmt| stmt.exists([table, column]))
        .unwrap_or(false)
}
