//! Mediawire CLI - Command-line interface
//!
//! Runs the job server or submits a single job to one.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use mediawire_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "mediawire")]
#[command(about = "Remote media editing over TCP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Console log level
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full debug log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    commands::handle_command(cli.command, cli.config.as_deref()).await
}
