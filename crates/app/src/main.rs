mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use dexter_storage::SqliteStore;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::commands::{ImportArgs, Session};
use crate::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, config_path) = Config::load(cli.config.as_deref())?;
    if let Some(path) = &config_path {
        tracing::debug!("using config {}", path.display());
    }

    let db_path = cli.db.clone().unwrap_or_else(|| config.database.path.clone());
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let session = Session {
        store: &store,
        config: &config,
        preview: cli.preview,
    };

    match cli.command {
        Command::Accounts { file } => {
            commands::load_accounts(&session, &file).await?;
        }
        Command::Import {
            files,
            account,
            profile,
            start_date,
            end_date,
        } => {
            let args = ImportArgs {
                files,
                account,
                profile,
                start_date,
                end_date,
            };
            commands::import(&session, args).await?;
        }
        Command::Rules { file } => {
            commands::load_rules(&session, &file).await?;
        }
        Command::Pair => {
            commands::pair(&session).await?;
        }
        Command::Reconcile { card, mode } => {
            commands::reconcile(&session, card.as_deref(), mode).await?;
        }
    }
    Ok(())
}
