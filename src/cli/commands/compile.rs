//! Compile command: show the SQL a filter expression turns into.

use crate::cli::commands::print_json;
use crate::error::Result;
use crate::query::FilterQuery;
use serde_json::json;

/// Execute the compile command.
///
/// # Errors
///
/// Returns an error only if JSON output fails.
pub fn execute(filter: &str, json: bool) -> Result<()> {
    let compiled = FilterQuery::parse(filter).compile();

    if json {
        return print_json(&json!({
            "condition": compiled.condition,
            "params": compiled.params,
            "sort": compiled.sort,
        }));
    }

    println!("WHERE {}", compiled.where_clause());
    if !compiled.params.is_empty() {
        println!("PARAMS {:?}", compiled.params);
    }
    println!("ORDER BY {}", compiled.sort);
    Ok(())
}
