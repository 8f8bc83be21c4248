//! Poll command: a bounded number of scheduler steps.

use crate::cli::PollArgs;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides, SharedConfig};
use crate::error::Result;
use crate::sync::{ExecOutcome, Scheduler, StepReport};
use serde_json::{Value, json};
use tracing::debug;

/// Execute the poll command.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, configuration is
/// invalid, or a step fails on storage.
pub async fn execute(args: &PollArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = config::open_storage_with_cli(cli)?;
    let sync_config = ctx.sync_config()?;
    let mut scheduler = Scheduler::with_http(ctx.storage, SharedConfig::new(sync_config))?;
    scheduler.start()?;
    if let Some(id) = args.stream {
        scheduler.refresh_stream(id)?;
    }

    let mut reports = Vec::with_capacity(args.steps);
    for _ in 0..args.steps {
        let Some(report) = scheduler.step().await? else {
            debug!("No enabled streams");
            break;
        };
        if !json {
            println!("{}", format_report(&report));
        }
        reports.push(report);
    }
    scheduler.stop();

    if json {
        let rows: Vec<Value> = reports.iter().map(report_json).collect();
        return print_json(&rows);
    }
    if reports.is_empty() {
        println!("No enabled streams.");
    }
    Ok(())
}

fn format_report(report: &StepReport) -> String {
    let detail = match &report.outcome {
        ExecOutcome::Searched {
            query,
            page,
            total_count,
            updated_ids,
        } => format!(
            "page {page} of `{query}`: {total_count} total, {} updated",
            updated_ids.len()
        ),
        ExecOutcome::Idle => "no queries".to_string(),
        ExecOutcome::Skipped => "backing off".to_string(),
        ExecOutcome::Halted => "halted".to_string(),
        ExecOutcome::Failed => "request failed".to_string(),
    };
    format!(
        "[{}] {}: {detail} ({} unread)",
        report.stream_id, report.name, report.unread
    )
}

fn report_json(report: &StepReport) -> Value {
    let mut row = json!({
        "stream_id": report.stream_id,
        "name": report.name,
        "unread": report.unread,
    });
    let outcome = match &report.outcome {
        ExecOutcome::Searched {
            query,
            page,
            total_count,
            updated_ids,
        } => json!({
            "status": "searched",
            "query": query,
            "page": page,
            "total_count": total_count,
            "updated_ids": updated_ids,
        }),
        ExecOutcome::Idle => json!({ "status": "idle" }),
        ExecOutcome::Skipped => json!({ "status": "skipped" }),
        ExecOutcome::Halted => json!({ "status": "halted" }),
        ExecOutcome::Failed => json!({ "status": "failed" }),
    };
    row["outcome"] = outcome;
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: ExecOutcome) -> StepReport {
        StepReport {
            stream_id: 3,
            name: "bugs".to_string(),
            outcome,
            unread: 2,
        }
    }

    #[test]
    fn test_format_searched_report() {
        let line = format_report(&report(ExecOutcome::Searched {
            query: "label:bug".to_string(),
            page: 1,
            total_count: 40,
            updated_ids: vec![1, 2],
        }));
        assert_eq!(line, "[3] bugs: page 1 of `label:bug`: 40 total, 2 updated (2 unread)");
    }

    #[test]
    fn test_report_json_status() {
        let value = report_json(&report(ExecOutcome::Halted));
        assert_eq!(value["outcome"]["status"], "halted");
        assert_eq!(value["unread"], 2);
    }
}
