//! Cliniq - clinical question answering CLI
//!
#![doc = "Main entry point for the Cliniq application."]

use anyhow::Result;

use cliniq::cli::{Cli, Commands};
use cliniq::commands;
use cliniq::config::Config;
use cliniq::logging::init_tracing;
use cliniq::session::metrics::init_metrics_exporter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    init_tracing(&config.logging)?;
    init_metrics_exporter();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Chat { conversation, user } => {
            if let Some(id) = &conversation {
                tracing::debug!("Resuming conversation: {}", id);
            }
            commands::chat::run_chat(config, conversation, user).await?;
            Ok(())
        }
        Commands::History { conversation, json } => {
            tracing::info!("Starting history command");
            commands::history::handle_history(&config, &conversation, json).await?;
            Ok(())
        }
    }
}
