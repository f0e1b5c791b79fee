//! # Channels API Main Entry Point

use channels::{config::ConfigLoader, db, server::run_server, telemetry::init_tracing};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "channels", version, about = "Messaging channel pairing service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply migrations, then serve the HTTP API (default)
    Serve,
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let pool = db::init_pool(&config).await?;
    db::run_migrations(&pool).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Serve => run_server(config, pool).await,
    }
}
