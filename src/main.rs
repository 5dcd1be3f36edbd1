use std::process::ExitCode;

use clap::Parser;
use customer_db::config::LoggingConfig;

mod cli;

use cli::command::{Cli, Commands};
use cli::output::{self, OutputConfig};

fn main() -> ExitCode {
    let cli = Cli::parse();
    output::configure(OutputConfig::new(cli.json, cli.quiet));

    match &cli.env_file {
        Some(path) => {
            if let Err(e) = dotenvy::from_path(path) {
                output::error(&format!("Failed to load {}: {e}", path.display()));
                return ExitCode::FAILURE;
            }
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    LoggingConfig::from_env().init();

    let result = match &cli.command {
        Commands::Url(args) => cli::url::execute_url(args),
        Commands::Check(args) => cli::check::execute_check(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            output::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
