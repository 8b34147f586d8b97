//! # Connector Sync Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use connector_sync::{
    config::ConfigLoader,
    db,
    server::{AppState, run_server},
    telemetry,
};

#[derive(Parser, Debug)]
#[command(name = "connector-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending migrations and serve the HTTP API (default)
    Serve,
    /// Apply pending migrations and exit
    Migrate,
    /// Delete sync history older than the retention window and exit
    Cleanup {
        #[arg(long, default_value = "30")]
        retention_days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    tracing::info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config, db).await,
        Command::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Cleanup { retention_days } => {
            let state = AppState::new(config, db).context("building application state")?;
            let deleted = state.cron_monitor.cleanup_old_logs(retention_days).await?;
            tracing::info!(deleted, retention_days, "Cleanup finished");
            Ok(())
        }
    }
}
