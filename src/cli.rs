//! Command-line interface definition for DbaChat
//!
//! This module defines the CLI structure using clap's derive API,
//! providing the interactive chat plus a few one-shot directory commands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// DbaChat - chat with your database assistant from the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "dbachat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Server base URL (overrides config and DBACHAT_SERVER_URL)
    #[arg(long)]
    pub server: Option<String>,

    /// Directory for client-local state (last database/chat, theme, role)
    #[arg(long, env = "DBACHAT_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for DbaChat
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Database to open (defaults to the last one used)
        #[arg(short, long)]
        database: Option<String>,

        /// Chat to open (defaults to the last one used in that database)
        #[arg(long)]
        chat: Option<i64>,

        /// Assistant role: assistant or dba
        #[arg(short, long)]
        role: Option<String>,
    },

    /// List databases and their descriptions
    Databases {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List chats of a database
    Chats {
        /// Database name
        database: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show or replace a database description
    Describe {
        /// Database name
        database: String,

        /// New description; prints the current one when omitted
        text: Option<String>,
    },

    /// Download an attachment of a chat
    Fetch {
        /// Database name
        database: String,

        /// Chat id
        chat: i64,

        /// Attachment file name
        name: String,

        /// Output path (defaults to the attachment name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_with_overrides() {
        let cli = Cli::try_parse_from([
            "dbachat",
            "--server",
            "http://db:8888",
            "chat",
            "--database",
            "Sales",
            "--chat",
            "42",
            "--role",
            "dba",
        ])
        .unwrap();

        assert_eq!(cli.server.as_deref(), Some("http://db:8888"));
        match cli.command {
            Commands::Chat {
                database,
                chat,
                role,
            } => {
                assert_eq!(database.as_deref(), Some("Sales"));
                assert_eq!(chat, Some(42));
                assert_eq!(role.as_deref(), Some("dba"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_describe_without_text() {
        let cli = Cli::try_parse_from(["dbachat", "describe", "Sales"]).unwrap();
        match cli.command {
            Commands::Describe { database, text } => {
                assert_eq!(database, "Sales");
                assert!(text.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_config_default_path() {
        let cli = Cli::try_parse_from(["dbachat", "databases"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("config/config.yaml"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_fetch_requires_name() {
        assert!(Cli::try_parse_from(["dbachat", "fetch", "Sales", "3"]).is_err());
    }
}
