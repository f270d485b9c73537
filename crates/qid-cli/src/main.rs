//! QID command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "qid")]
#[command(about = "A small CI/CD engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the QID control plane
    Server(commands::server::ServerArgs),
    /// Start QID workers against a remote control plane
    Worker(commands::worker::WorkerArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => commands::server::run(args).await,
        Commands::Worker(args) => commands::worker::run(args).await,
    }
}
