//! Acebridge CLI - Command-line interface
//!
//! Runs the HTTP front and offers one-shot diagnostics against the engine
//! and the local encoder toolchain.

mod commands;

use std::path::PathBuf;

use acebridge_core::tracing_setup::{CliLogLevel, init_tracing};
use clap::Parser;

#[derive(Parser)]
#[command(name = "acebridge")]
#[command(about = "HTTP front for a peer-to-peer media engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level (RUST_LOG overrides)
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full-trace log of the last run
    #[arg(long, global = true, default_value = "logs")]
    logs_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), Some(&cli.logs_dir))?;

    commands::handle_command(cli.command).await
}
