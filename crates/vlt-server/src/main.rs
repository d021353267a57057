// crates/vlt-server/src/main.rs
// vlt - persistent cognitive memory and code intelligence for AI coding agents

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Quiet by default; index and daemon runs are chatty enough to matter
    let log_level = match &cli.command {
        Commands::Index { .. } => Level::INFO,
        Commands::Daemon { .. } => Level::INFO,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    cli::run(cli).await
}
