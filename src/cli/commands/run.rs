//! Run command: the long-lived scheduler loop.

use crate::config::{self, CliOverrides, SharedConfig};
use crate::error::Result;
use crate::sync::{Scheduler, SchedulerHandle, StreamEvent};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Run the scheduler until Ctrl-C.
///
/// Stream updates are printed as they happen, one JSON object per line
/// with `--json`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, configuration is
/// invalid, or the scheduler hits a storage failure.
pub async fn execute(json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(cli)?;
    let sync_config = ctx.sync_config()?;
    info!(
        db = %ctx.db_path.display(),
        base_url = %sync_config.base_url(),
        "Starting scheduler"
    );
    let scheduler = Scheduler::with_http(ctx.storage, SharedConfig::new(sync_config))?;

    let mut events = scheduler.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event, json),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (handle, commands) = SchedulerHandle::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = handle.shutdown().await;
        }
    });

    scheduler.run(commands).await
}

fn print_event(event: &StreamEvent, json: bool) {
    match event {
        StreamEvent::StreamUpdated {
            stream_id,
            updated_ids,
        } => {
            if updated_ids.is_empty() {
                return;
            }
            if json {
                println!(
                    "{}",
                    json!({ "event": "stream_updated", "stream_id": stream_id, "updated_ids": updated_ids })
                );
            } else {
                println!("stream {stream_id}: {} updated", updated_ids.len());
            }
        }
        StreamEvent::UnreadCount(count) => {
            if json {
                println!("{}", json!({ "event": "unread_count", "count": count }));
            }
        }
    }
}
