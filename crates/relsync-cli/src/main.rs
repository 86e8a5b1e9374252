mod backend;
mod cli;
mod commands;
mod config;
mod observability;
mod output;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use relsync_core::{Reconciler, SyncMode};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    // Load .env file if present; a missing file is not an error.
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    observability::init_tracing();

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let cfg = config::load_config(cli.config.as_deref())?;
    observability::apply_logging_level(cli.log_level.as_deref().unwrap_or(&cfg.logging.level));
    let schema = cfg.build_schema()?;

    tracing::info!(
        backend = ?cfg.storage.backend,
        entities = schema.entities().count(),
        associations = schema.associations().count(),
        "Configuration loaded"
    );

    if let Commands::CheckConfig = cli.command {
        return commands::check::check_config(&cfg, &schema).await;
    }

    let storage = backend::open_storage(&cfg.storage, &schema).await?;
    let reconciler = Reconciler::new(storage, Arc::new(schema));

    match &cli.command {
        Commands::Sync(args) => {
            commands::reconcile::reconcile(&reconciler, SyncMode::FullSync, args, format).await?;
        }
        Commands::Add(args) => {
            commands::reconcile::reconcile(&reconciler, SyncMode::AddMissing, args, format)
                .await?;
        }
        Commands::Remove(args) => {
            commands::reconcile::reconcile(&reconciler, SyncMode::RemovePresent, args, format)
                .await?;
        }
        Commands::Show(args) => {
            commands::reconcile::show(&reconciler, args, format).await?;
        }
        Commands::CheckConfig => {}
    }

    Ok(())
}
