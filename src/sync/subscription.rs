//! Manual subscriptions to single issues.

use crate::error::{Result, SyncError};
use crate::model::{StreamKind, Subscription};
use crate::remote::GitHubClient;
use crate::storage::{CacheLimits, SqliteStorage};
use crate::util::parse_api_path;
use tracing::info;

/// Fetch the issue behind `url`, cache it, link it to the subscription
/// stream, and record the subscription.
///
/// Accepts API urls and html urls (`.../{owner}/{repo}/issues/{n}`).
///
/// # Errors
///
/// Returns a validation error for urls without an issue path, or the
/// remote / storage failure.
pub async fn subscribe_issue(
    storage: &mut SqliteStorage,
    client: &GitHubClient,
    limits: &CacheLimits,
    url: &str,
) -> Result<Subscription> {
    let path = parse_api_path(url)
        .ok_or_else(|| SyncError::validation("url", format!("not an issue url: {url}")))?;

    let issue = client.issue(&path.repo(), path.number).await?;
    storage.import_issues(std::slice::from_ref(&issue), None, limits)?;
    storage.link_and_reconcile(StreamKind::SUBSCRIPTION_ID, &[issue.id])?;
    let subscription = storage.subscribe(issue.id, &issue.url)?;
    info!(id = issue.id, repo = %subscription.repo, "Subscribed");
    Ok(subscription)
}

/// Remove a subscription and its link to the subscription stream.
///
/// # Errors
///
/// Returns an error if the database update fails.
pub fn unsubscribe_issue(storage: &mut SqliteStorage, issue_id: i64) -> Result<bool> {
    let removed = storage.unsubscribe(issue_id)?;
    if removed {
        storage.unlink(StreamKind::SUBSCRIPTION_ID, issue_id)?;
        info!(id = issue_id, "Unsubscribed");
    }
    Ok(removed)
}
