//! DbaChat - terminal client library for the database assistant
//!
//! This library provides the client side of a chat service that answers
//! questions about databases: a socket transport with reconnection, the
//! session state, the streaming reconciler that turns server events into a
//! conversation view, and a REST client for databases, chats and files.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `transport`: Duplex socket connection and reconnect policy
//! - `session`: Active database, chat, role and connection status
//! - `reconciler`: Turn state machine and conversation view
//! - `directory`: REST client for databases, chats and attachments
//! - `client`: Controller running the single event loop
//! - `presentation`: Markdown rendering and terminal output
//! - `config`: Configuration management and validation
//! - `logging`: Log output setup
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use dbachat::cli::Cli;
//! use dbachat::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse_args();
//!     let config = Config::load("config/config.yaml", &cli)?;
//!     println!("{}", config.server.ws_url()?);
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod chat_list;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod description;
pub mod directory;
pub mod error;
pub mod logging;
pub mod presentation;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use client::{ChatClient, UserAction};
pub use config::Config;
pub use error::{DbaChatError, Result};
pub use reconciler::{Reconciler, TurnState};
pub use session::{ConnectionStatus, SessionState};
