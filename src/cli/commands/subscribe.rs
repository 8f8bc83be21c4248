//! Subscription commands.

use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides, SharedConfig};
use crate::error::{Result, SyncError};
use crate::model::Subscription;
use crate::remote::{GitHubClient, HttpTransport, RequestPipeline};
use crate::sync::{subscribe_issue, unsubscribe_issue};
use crate::util::time::format_timestamp;
use serde_json::json;
use std::sync::Arc;

/// Subscribe to the issue at `url`.
///
/// # Errors
///
/// Returns an error if the url is not an issue url, the issue cannot be
/// fetched, or the database update fails.
pub async fn subscribe(url: &str, json: bool, cli: &CliOverrides) -> Result<()> {
    let mut ctx = config::open_storage_with_cli(cli)?;
    let sync_config = ctx.sync_config()?;
    let limits = sync_config.cache_limits();

    let transport = Arc::new(HttpTransport::new(&sync_config)?);
    let pipeline = RequestPipeline::new(SharedConfig::new(sync_config));
    pipeline.start();
    let client = GitHubClient::new(transport, pipeline.clone());

    let result = subscribe_issue(&mut ctx.storage, &client, &limits, url).await;
    pipeline.stop();
    let subscription = result?;

    if json {
        return print_json(&subscription);
    }
    println!(
        "Subscribed to {} in {} (issue {})",
        subscription.url, subscription.repo, subscription.issue_id
    );
    Ok(())
}

/// Remove the subscription for `id`.
///
/// # Errors
///
/// Returns `IssueNotFound` if there is no such subscription.
pub fn unsubscribe(id: i64, json: bool, cli: &CliOverrides) -> Result<()> {
    let mut ctx = config::open_storage_with_cli(cli)?;
    if !unsubscribe_issue(&mut ctx.storage, id)? {
        return Err(SyncError::IssueNotFound { id });
    }
    if json {
        return print_json(&json!({ "issue_id": id, "unsubscribed": true }));
    }
    println!("Unsubscribed from {id}");
    Ok(())
}

/// List subscriptions in the order they were added.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn list(json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(cli)?;
    let subscriptions = ctx.storage.list_subscriptions()?;
    if json {
        return print_json(&subscriptions);
    }
    if subscriptions.is_empty() {
        println!("No subscriptions.");
        return Ok(());
    }
    for subscription in &subscriptions {
        println!("{}", format_subscription(subscription));
    }
    Ok(())
}

fn format_subscription(subscription: &Subscription) -> String {
    format!(
        "{:>10}  {}  {}",
        subscription.issue_id,
        format_timestamp(&subscription.created_at),
        subscription.url
    )
}
