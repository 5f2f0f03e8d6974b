//! Nimbus CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, IndexCommands};
use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(author, version, about = "Publish build assets to a CDN bucket", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    let distributor = handlers::distributor(&config).await?;

    match cli.command {
        Commands::PublishText {
            asset_type,
            file,
            fingerprint,
        } => {
            handlers::publish_text(&distributor, asset_type, &file, fingerprint).await?;
        }
        Commands::PublishImage {
            local_path,
            virtual_path,
        } => {
            handlers::publish_image(&distributor, &local_path, &virtual_path).await?;
        }
        Commands::Url { key } => handlers::url(&distributor, &key)?,
        Commands::Index { command } => match command {
            IndexCommands::List { json } => handlers::list_index(&distributor, json).await?,
            IndexCommands::Get { key } => handlers::get_index(&distributor, &key).await?,
        },
    }

    Ok(())
}
