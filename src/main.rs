//! DbaChat - terminal client for the database assistant
//!
#![doc = "DbaChat - terminal client for the database assistant"]
#![doc = "Main entry point for the dbachat binary."]

use anyhow::Result;

use dbachat::cli::{Cli, Commands};
use dbachat::commands;
use dbachat::config::Config;
use dbachat::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Initialize logging (the config decides where records go)
    init_logging(&config.logging, cli.verbose)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat {
            database,
            chat,
            role,
        } => {
            if let Some(db) = &database {
                tracing::debug!("Using database override: {}", db);
            }
            if let Some(r) = &role {
                tracing::debug!("Using role override: {}", r);
            }
            commands::chat::run_chat(config, database, chat, role).await?;
            Ok(())
        }
        Commands::Databases { json } => {
            commands::databases::list_databases(&config, json).await?;
            Ok(())
        }
        Commands::Chats { database, json } => {
            commands::chats::list_chats(&config, &database, json).await?;
            Ok(())
        }
        Commands::Describe { database, text } => {
            commands::describe::describe(&config, &database, text).await?;
            Ok(())
        }
        Commands::Fetch {
            database,
            chat,
            name,
            output,
        } => {
            commands::fetch::fetch(&config, &database, chat, &name, output).await?;
            Ok(())
        }
    }
}
