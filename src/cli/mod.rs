//! CLI definitions and entry point.

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Keep local caches of GitHub issue searches in sync
#[derive(Parser, Debug)]
#[command(name = "ssync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.local/share/ssync/streamsync.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Additional YAML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// API host (e.g. api.github.com or a GitHub Enterprise host)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Personal access token
    #[arg(long, global = true, env = "SSYNC_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler until interrupted
    Run,

    /// Run a fixed number of scheduler steps and exit
    Poll(PollArgs),

    /// Manage streams
    Stream {
        #[command(subcommand)]
        command: StreamCommands,
    },

    /// List cached issues matching a filter
    Issues(IssuesArgs),

    /// Show the SQL a filter compiles to
    Compile {
        /// Filter expression, e.g. `is:open label:bug -author:bot`
        filter: String,
    },

    /// Change local state of a cached issue
    Mark(MarkArgs),

    /// Subscribe to a single issue by URL
    Subscribe {
        /// Issue URL (API or html)
        url: String,
    },

    /// Remove a subscription
    Unsubscribe {
        /// Issue id
        id: i64,
    },

    /// List subscribed issues
    Subscriptions,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct PollArgs {
    /// Number of scheduler steps to run
    #[arg(long, default_value_t = 1)]
    pub steps: usize,

    /// Refresh this stream first (runs ahead of the rotation)
    #[arg(long)]
    pub stream: Option<i64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StreamCommands {
    /// List streams
    List,

    /// Add a user stream
    Add {
        /// Stream name
        #[arg(long)]
        name: String,

        /// Search query (repeatable)
        #[arg(long = "query", required = true)]
        queries: Vec<String>,

        /// Position in the rotation
        #[arg(long)]
        position: Option<i64>,
    },

    /// Delete a user stream and issues no other stream holds
    Remove { id: i64 },

    /// Include a stream in the rotation
    Enable { id: i64 },

    /// Exclude a stream from the rotation
    Disable { id: i64 },

    /// Show the queries a stream last searched with
    Queries { id: i64 },
}

#[derive(Args, Debug, Clone, Default)]
pub struct IssuesArgs {
    /// Filter expression
    pub filter: Option<String>,

    /// Only issues linked to this stream
    #[arg(long)]
    pub stream: Option<i64>,

    /// Maximum number of issues (0 = unlimited)
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone, Default)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["read", "unread", "star", "unstar", "archive", "unarchive"])
))]
#[allow(clippy::struct_excessive_bools)]
pub struct MarkArgs {
    /// Issue id
    pub id: i64,

    #[arg(long)]
    pub read: bool,

    /// Restore the read marker from before the last read
    #[arg(long)]
    pub unread: bool,

    #[arg(long)]
    pub star: bool,

    #[arg(long)]
    pub unstar: bool,

    #[arg(long)]
    pub archive: bool,

    #[arg(long)]
    pub unarchive: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    List,

    /// Show one effective value
    Get { key: String },

    /// Store a runtime value in the database
    Set { key: String, value: String },

    /// Remove a value from the database
    Unset { key: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_stream_add_collects_queries() {
        let cli = Cli::parse_from([
            "ssync", "stream", "add", "--name", "bugs", "--query", "label:bug", "--query", "is:open",
        ]);
        let Commands::Stream {
            command: StreamCommands::Add { name, queries, .. },
        } = cli.command
        else {
            panic!("expected stream add");
        };
        assert_eq!(name, "bugs");
        assert_eq!(queries, vec!["label:bug", "is:open"]);
    }

    #[test]
    fn test_mark_requires_one_action() {
        assert!(Cli::try_parse_from(["ssync", "mark", "5"]).is_err());
        assert!(Cli::try_parse_from(["ssync", "mark", "5", "--read", "--star"]).is_err());
        let cli = Cli::try_parse_from(["ssync", "mark", "5", "--archive"]).unwrap();
        assert!(matches!(cli.command, Commands::Mark(MarkArgs { id: 5, archive: true, .. })));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["ssync", "issues", "is:open", "--json", "--db", "/tmp/x.db", "-vv"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
    }
}
