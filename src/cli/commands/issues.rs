//! Issues command: list cached issues through the filter language.

use crate::cli::IssuesArgs;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides};
use crate::error::{Result, SyncError};
use crate::model::{Issue, IssueType};
use crate::storage::IssueQuery;
use tracing::debug;

/// Execute the issues command.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the query fails.
pub fn execute(args: &IssuesArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(cli)?;
    let storage = &ctx.storage;

    if let Some(stream_id) = args.stream {
        if storage.get_stream(stream_id)?.is_none() {
            return Err(SyncError::StreamNotFound { id: stream_id });
        }
    }

    let query = IssueQuery {
        filter: args.filter.clone(),
        stream_id: args.stream,
        limit: (args.limit > 0).then_some(args.limit),
        offset: None,
    };
    let issues = storage.list_issues(&query)?;
    debug!(count = issues.len(), filter = ?args.filter, "Listed issues");

    if json {
        return print_json(&issues);
    }
    for issue in &issues {
        println!("{}", format_issue_line(issue));
    }
    Ok(())
}

/// One-line summary: unread marker, star, kind, repo#number, title.
pub(crate) fn format_issue_line(issue: &Issue) -> String {
    let unread = if issue.is_unread() { '*' } else { ' ' };
    let star = if issue.marked_at.is_some() { '+' } else { ' ' };
    let kind = match issue.issue_type {
        IssueType::Issue => "issue",
        IssueType::Pr => "pr   ",
    };
    let state = if issue.is_closed() { " (closed)" } else { "" };
    format!(
        "{unread}{star} {kind} {}#{} {}{state}  [{}]",
        issue.repo, issue.number, issue.title, issue.id
    )
}
