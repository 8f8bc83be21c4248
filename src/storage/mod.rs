//! `SQLite` cache for issues, streams and their links.

mod import;
mod links;
pub mod schema;
mod sqlite;

pub use import::{CacheLimits, ImportOutcome};
pub use links::ReconcileOutcome;
pub use sqlite::{IssueQuery, SqliteStorage};
