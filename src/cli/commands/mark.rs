//! Mark command: local read / star / archive state.

use crate::cli::MarkArgs;
use crate::cli::commands::issues::format_issue_line;
use crate::cli::commands::print_json;
use crate::config::{self, CliOverrides};
use crate::error::Result;
use crate::util::time::now_utc;

/// Execute the mark command.
///
/// # Errors
///
/// Returns `IssueNotFound` if the issue is not cached.
pub fn execute(args: &MarkArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let mut ctx = config::open_storage_with_cli(cli)?;
    let storage = &mut ctx.storage;

    let issue = if args.read {
        storage.mark_read(args.id, &now_utc())?
    } else if args.unread {
        storage.mark_unread(args.id)?
    } else if args.star || args.unstar {
        storage.set_starred(args.id, args.star)?
    } else {
        storage.set_archived(args.id, args.archive)?
    };

    if json {
        return print_json(&issue);
    }
    println!("{}", format_issue_line(&issue));
    Ok(())
}
