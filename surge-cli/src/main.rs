//! Surge CLI - Command-line interface
//!
//! Downloads torrents and inspects `.torrent` files.

mod commands;

use anyhow::Context;
use clap::Parser;
use surge_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "surge")]
#[command(about = "A BitTorrent download client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level; `RUST_LOG` takes precedence when set
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("failed to set up logging")?;

    if let Err(e) = commands::handle_command(cli.command).await {
        tracing::error!("{}", e);
        eprintln!("error: {}", e.user_message());
        std::process::exit(if e.is_user_error() { 2 } else { 1 });
    }

    Ok(())
}
