//! Stream management commands.

use crate::cli::StreamCommands;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides};
use crate::error::{Result, SyncError};
use crate::storage::SqliteStorage;
use crate::util::time::format_timestamp;
use serde_json::json;
use tracing::info;

/// Execute a stream subcommand.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, the stream does not
/// exist, or validation fails.
pub fn execute(command: &StreamCommands, json: bool, cli: &CliOverrides) -> Result<()> {
    let mut ctx = config::open_storage_with_cli(cli)?;
    let storage = &mut ctx.storage;

    match command {
        StreamCommands::List => list(storage, json),
        StreamCommands::Add {
            name,
            queries,
            position,
        } => {
            let stream = storage.create_stream(name, queries, *position)?;
            info!(id = stream.id, name = %stream.name, "Created stream");
            if json {
                return print_json(&stream);
            }
            println!("Created stream {} ({})", stream.id, stream.name);
            Ok(())
        }
        StreamCommands::Remove { id } => {
            let removed = storage.delete_stream(*id)?;
            info!(id, removed, "Deleted stream");
            if json {
                return print_json(&json!({ "id": id, "issues_removed": removed }));
            }
            println!("Deleted stream {id} ({removed} cached issues removed)");
            Ok(())
        }
        StreamCommands::Enable { id } => set_enabled(storage, *id, true, json),
        StreamCommands::Disable { id } => set_enabled(storage, *id, false, json),
        StreamCommands::Queries { id } => {
            let stream = storage
                .get_stream(*id)?
                .ok_or(SyncError::StreamNotFound { id: *id })?;
            if json {
                return print_json(&stream.queries);
            }
            for query in &stream.queries {
                println!("{query}");
            }
            Ok(())
        }
    }
}

fn list(storage: &SqliteStorage, json: bool) -> Result<()> {
    let streams = storage.list_streams()?;
    if json {
        let rows: Vec<_> = streams
            .iter()
            .map(|s| -> Result<serde_json::Value> {
                Ok(json!({
                    "stream": s,
                    "kind": s.kind()?.as_str(),
                    "links": storage.count_stream_links(s.id)?,
                }))
            })
            .collect::<Result<_>>()?;
        return print_json(&rows);
    }

    for stream in &streams {
        let state = if stream.enabled { "" } else { " (disabled)" };
        let searched = stream
            .searched_at
            .as_ref()
            .map_or_else(|| "never".to_string(), format_timestamp);
        println!(
            "{:>4}  {:<20} {:>6} issues  searched {}{state}",
            stream.id,
            stream.name,
            storage.count_stream_links(stream.id)?,
            searched
        );
    }
    Ok(())
}

fn set_enabled(storage: &mut SqliteStorage, id: i64, enabled: bool, json: bool) -> Result<()> {
    storage.set_stream_enabled(id, enabled)?;
    if json {
        return print_json(&json!({ "id": id, "enabled": enabled }));
    }
    println!("Stream {id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}
