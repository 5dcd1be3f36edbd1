//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Inspect and check the customer service database configuration
#[derive(Parser, Debug)]
#[command(name = "customer-db")]
#[command(version)]
pub struct Cli {
    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Decrease output verbosity
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Load environment variables from this file instead of `./.env`
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the resolved connection URL
    Url(UrlArgs),

    /// Open a session against the resolved database and ping it
    Check(CheckArgs),
}

/// Arguments for `customer-db url`.
#[derive(Args, Debug)]
pub struct UrlArgs {
    /// Print the password instead of masking it
    #[arg(long)]
    pub reveal: bool,
}

/// Arguments for `customer-db check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Seconds to wait for a connection
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    pub timeout: u64,
}
