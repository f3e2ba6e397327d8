use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod completion;
mod config;
mod dispatch;
mod hooks;
mod render;

use completion::CliCompletionShell;

const LOG_ENV: &str = "UPSHIFT_LOG";

#[derive(Parser, Debug)]
#[command(name = "upshift")]
#[command(about = "Staged release updater and database schema reconciler", long_about = None)]
struct Cli {
    /// Configuration file, `upshift.toml` in the working directory by default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Unadorned output even on a terminal.
    #[arg(long, global = true)]
    plain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the versions published on a channel.
    Versions {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Show the installed release and the progress of the current operation.
    Status,
    /// Compare the installation against a target release, continuing a
    /// comparison already in progress for the same target.
    Compare {
        version: String,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        ignore_theme: bool,
        /// Print each step report as a JSON line.
        #[arg(long)]
        json: bool,
        /// Keep invoking steps until the comparison is done.
        #[arg(long)]
        until_done: bool,
    },
    /// Apply the completed comparison to the installation.
    Update {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        until_done: bool,
    },
    /// Choose which obsolete files the update deletes.
    SelectObsolete { paths: Vec<String> },
    /// Drop operation progress.
    Reset {
        #[arg(long, value_enum, default_value_t = ResetArg::Compare)]
        scope: ResetArg,
    },
    /// List differences between the object model and the database schema.
    DbDiff {
        #[arg(long)]
        json: bool,
    },
    /// Apply the fixes for the given difference ids on every server.
    DbFix {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ResetArg {
    Session,
    Compare,
    All,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    dispatch::run_cli(cli)
}
