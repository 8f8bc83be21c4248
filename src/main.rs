use clap::Parser;
use std::io::{self, IsTerminal};
use streamsync::SyncError;
use streamsync::cli::commands;
use streamsync::cli::{Cli, Commands};
use streamsync::config;
use streamsync::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let overrides = build_cli_overrides(&cli);

    // The log file may come from a config file as well as the flag.
    let log_file = cli.log_file.clone().or_else(|| {
        config::load_startup_config(overrides.config_file.as_deref(), &overrides)
            .ok()
            .and_then(|layer| config::log_file_from_layer(&layer))
    });
    if let Err(e) = init_logging(cli.verbose, cli.quiet, log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let json = cli.json;
    let result = match cli.command {
        Commands::Run => commands::run::execute(json, &overrides).await,
        Commands::Poll(args) => commands::poll::execute(&args, json, &overrides).await,
        Commands::Stream { command } => commands::stream::execute(&command, json, &overrides),
        Commands::Issues(args) => commands::issues::execute(&args, json, &overrides),
        Commands::Compile { filter } => commands::compile::execute(&filter, json),
        Commands::Mark(args) => commands::mark::execute(&args, json, &overrides),
        Commands::Subscribe { url } => commands::subscribe::subscribe(&url, json, &overrides).await,
        Commands::Unsubscribe { id } => commands::subscribe::unsubscribe(id, json, &overrides),
        Commands::Subscriptions => commands::subscribe::list(json, &overrides),
        Commands::Config { command } => commands::config::execute(&command, json, &overrides),
    };

    if let Err(e) = result {
        handle_error(&e, json);
    }
}

/// Print the error and exit with its exit code.
///
/// JSON goes to stderr when --json is set or stdout is not a terminal.
fn handle_error(err: &SyncError, json_mode: bool) -> ! {
    if json_mode || !io::stdout().is_terminal() {
        let json = err.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        eprintln!("Error: {err}");
        if err.is_user_recoverable() {
            eprintln!("Run `ssync --help` for usage.");
        }
    }
    std::process::exit(err.exit_code());
}

fn build_cli_overrides(cli: &Cli) -> config::CliOverrides {
    config::CliOverrides {
        db: cli.db.clone(),
        config_file: cli.config.clone(),
        log_file: cli.log_file.clone(),
        host: cli.host.clone(),
        access_token: cli.token.clone(),
    }
}
