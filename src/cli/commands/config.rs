//! Configuration management command.
//!
//! `list` and `get` show the effective (merged) configuration; `set` and
//! `unset` edit the database layer, which has the lowest precedence after
//! the defaults.

use crate::cli::ConfigCommands;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides, ConfigLayer, SyncConfig, is_runtime_key, is_startup_key};
use crate::error::{Result, SyncError};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

/// Execute a config subcommand.
///
/// # Errors
///
/// Returns an error for unknown keys, invalid values, or database failures.
pub fn execute(command: &ConfigCommands, json: bool, cli: &CliOverrides) -> Result<()> {
    let mut ctx = config::open_storage_with_cli(cli)?;

    match command {
        ConfigCommands::List => {
            let values = effective_values(&ctx.sync_config()?, &ctx.db_path.display().to_string());
            if json {
                return print_json(&values);
            }
            for (key, value) in &values {
                println!("{key} = {}", value.as_deref().unwrap_or("(unset)"));
            }
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let key = normalize(key);
            let values = effective_values(&ctx.sync_config()?, &ctx.db_path.display().to_string());
            let value = values
                .get(key.as_str())
                .ok_or_else(|| SyncError::validation("key", format!("unknown config key: {key}")))?;
            if json {
                return print_json(&json!({ "key": key, "value": value }));
            }
            println!("{}", value.as_deref().unwrap_or(""));
            Ok(())
        }
        ConfigCommands::Set { key, value } => {
            let key = normalize(key);
            if is_startup_key(&key) {
                return Err(SyncError::validation(
                    "key",
                    format!("{key} is a startup key; set it in a config file, env, or flag"),
                ));
            }
            if !is_runtime_key(&key) {
                return Err(SyncError::validation("key", format!("unknown config key: {key}")));
            }
            let mut candidate = ConfigLayer::default();
            candidate.runtime.insert(key.clone(), value.clone());
            SyncConfig::from_layer(&candidate)?;

            ctx.storage.set_config(&key, value)?;
            info!(key = %key, "Config value stored");
            if json {
                return print_json(&json!({ "key": key, "value": value }));
            }
            println!("{key} = {value}");
            Ok(())
        }
        ConfigCommands::Unset { key } => {
            let key = normalize(key);
            let removed = ctx.storage.delete_config(&key)?;
            if json {
                return print_json(&json!({ "key": key, "removed": removed }));
            }
            if removed {
                println!("Removed {key}");
            } else {
                println!("{key} was not set in the database");
            }
            Ok(())
        }
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn effective_values(config: &SyncConfig, db_path: &str) -> BTreeMap<&'static str, Option<String>> {
    let mut values: BTreeMap<_, _> = config.to_pairs().into_iter().collect();
    values.insert("db", Some(db_path.to_string()));
    values
}
