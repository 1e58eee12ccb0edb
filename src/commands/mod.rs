/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat`: Interactive chat session
- `databases`: List databases and descriptions
- `chats`: List chats of a database
- `describe`: Show or replace a database description
- `fetch`: Download a chat attachment

The one-shot commands talk to the directory service only; the chat
session also opens the socket.
*/

use crate::client::UserAction;
use crate::commands::special_commands::{parse_special_command, CommandError, SpecialCommand};
use crate::config::Config;
use crate::directory::HttpDirectory;
use crate::error::Result;
use std::path::PathBuf;

// Special commands parser for in-chat commands
pub mod special_commands;

/// What a line typed in the chat prompt asks for
#[derive(Debug, Clone, PartialEq)]
pub enum LineInput {
    /// Hand this action to the chat client
    Action(UserAction),
    /// Print the command help
    Help,
    /// Leave the session
    Exit,
    /// Nothing to do (blank line)
    Empty,
}

/// Interpret one line of chat input
///
/// # Errors
///
/// Returns the parser's [`CommandError`] for malformed `/` commands.
///
/// # Examples
///
/// ```
/// use dbachat::client::UserAction;
/// use dbachat::commands::{interpret_line, LineInput};
///
/// assert_eq!(
///     interpret_line("show me slow queries").unwrap(),
///     LineInput::Action(UserAction::Send("show me slow queries".to_string()))
/// );
/// assert_eq!(interpret_line("/help").unwrap(), LineInput::Help);
/// ```
pub fn interpret_line(line: &str) -> std::result::Result<LineInput, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(LineInput::Empty);
    }

    let action = match parse_special_command(trimmed)? {
        SpecialCommand::None => UserAction::Send(trimmed.to_string()),
        SpecialCommand::SelectDatabase(name) => UserAction::SelectDatabase(name),
        SpecialCommand::ListDatabases => UserAction::RefreshDatabases,
        SpecialCommand::SelectChat(id) => UserAction::SelectChat(id),
        SpecialCommand::ListChats => UserAction::RefreshChats,
        SpecialCommand::NewChat => UserAction::NewChat,
        SpecialCommand::Star { chat, starred } => UserAction::StarChat {
            chat_id: chat,
            starred,
        },
        SpecialCommand::Rename { chat, title } => UserAction::RenameChat {
            chat_id: chat,
            title,
        },
        SpecialCommand::Delete(chat) => UserAction::DeleteChat(chat),
        SpecialCommand::Clear => UserAction::ClearChat,
        SpecialCommand::SetRole(role) => UserAction::SetRole(role),
        SpecialCommand::Attach(path) => UserAction::Attach(path),
        SpecialCommand::Describe(None) => UserAction::ShowDescription,
        SpecialCommand::Describe(Some(text)) => UserAction::EditDescription(text),
        SpecialCommand::Fetch { name, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&name));
            UserAction::FetchAttachment { name, output }
        }
        SpecialCommand::Theme(theme) => UserAction::SetTheme(theme),
        SpecialCommand::ShowStatus => UserAction::ShowStatus,
        SpecialCommand::Help => return Ok(LineInput::Help),
        SpecialCommand::Exit => return Ok(LineInput::Exit),
    };
    Ok(LineInput::Action(action))
}

fn directory(config: &Config) -> Result<HttpDirectory> {
    HttpDirectory::new(config.server.rest_url()?, config.server.request_timeout())
}

// Chat command handler
pub mod chat {
    //! Interactive chat session.
    //!
    //! Opens the socket and the directory client, restores the remembered
    //! context and runs the [`ChatClient`] loop. Lines are read with
    //! `rustyline` on a dedicated thread and forwarded as actions.

    use super::*;
    use crate::client::{ChatClient, Startup};
    use crate::presentation::{PlainRenderer, TerminalPresenter};
    use crate::protocol::{ChatId, Role};
    use crate::store::ClientStore;
    use crate::transport::{Backoff, WsTransport};
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Start an interactive chat session
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `database` - Database to open instead of the remembered one
    /// * `chat` - Chat to open instead of the remembered one
    /// * `role` - Role override ("assistant" or "dba")
    ///
    /// # Errors
    ///
    /// Returns an error if the role is unknown or the server URL is invalid.
    pub async fn run_chat(
        config: Config,
        database: Option<String>,
        chat: Option<ChatId>,
        role: Option<String>,
    ) -> Result<()> {
        tracing::info!("Starting interactive chat session");

        let role = role
            .as_deref()
            .map(Role::parse_str)
            .transpose()
            .map_err(crate::error::DbaChatError::Validation)?;

        let store = match ClientStore::open_in(config.storage.state_dir.as_deref()) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("Client state will not be remembered: {}", e);
                None
            }
        };

        let transport = Arc::new(WsTransport::connect(
            config.server.ws_url()?,
            Backoff::from_config(&config.transport),
            config.server.connect_timeout(),
        ));
        let directory = Arc::new(directory(&config)?);

        let mut client = ChatClient::new(
            &config,
            transport.clone(),
            directory,
            Arc::new(PlainRenderer),
            store,
        );
        let mut presenter = TerminalPresenter::stdout(client.preferences().theme);

        print_welcome_banner(&config);
        client.start(Startup {
            database,
            chat,
            role,
        });

        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        // plain thread: a pending readline must not hold up runtime shutdown
        std::thread::Builder::new()
            .name("dbachat-input".to_string())
            .spawn(move || read_lines(actions_tx))?;

        client.run(actions_rx, &mut presenter).await?;
        transport.shutdown();

        println!("Goodbye!");
        Ok(())
    }

    fn read_lines(actions: mpsc::UnboundedSender<UserAction>) {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                tracing::error!("Cannot read input: {}", e);
                let _ = actions.send(UserAction::Quit);
                return;
            }
        };

        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                    }
                    match interpret_line(&line) {
                        Ok(LineInput::Action(action)) => {
                            if actions.send(action).is_err() {
                                break;
                            }
                        }
                        Ok(LineInput::Help) => special_commands::print_help(),
                        Ok(LineInput::Exit) => {
                            let _ = actions.send(UserAction::Quit);
                            break;
                        }
                        Ok(LineInput::Empty) => {}
                        Err(e) => eprintln!("{}", e),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = actions.send(UserAction::Quit);
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    let _ = actions.send(UserAction::Quit);
                    break;
                }
            }
        }
    }

    fn print_welcome_banner(config: &Config) {
        use colored::Colorize;
        println!(
            "{} {}",
            "dbachat".bold(),
            format!("connected to {}", config.server.base_url).dimmed()
        );
        println!("{}", "Type /help for commands, exit to leave.\n".dimmed());
    }
}

// Databases command handler
pub mod databases {
    //! List databases and their descriptions.

    use super::*;
    use crate::directory::Directory;
    use prettytable::{row, Table};

    /// Print every database, as a table or as JSON
    pub async fn list_databases(config: &Config, json: bool) -> Result<()> {
        let databases = directory(config)?.list_databases().await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&databases)?);
            return Ok(());
        }
        if databases.is_empty() {
            println!("No databases found.");
            return Ok(());
        }

        let mut table = Table::new();
        table.add_row(row!["Database", "Description"]);
        for db in &databases {
            table.add_row(row![db.name, db.description]);
        }
        table.printstd();
        Ok(())
    }
}

// Chats command handler
pub mod chats {
    //! List chats of a database.

    use super::*;
    use crate::chat_list::ChatList;
    use crate::directory::Directory;
    use prettytable::{row, Table};

    /// Print the chats of `database` in display order
    pub async fn list_chats(config: &Config, database: &str, json: bool) -> Result<()> {
        let mut list = ChatList::new();
        list.replace(database, directory(config)?.list_chats(database).await?);

        if json {
            println!("{}", serde_json::to_string_pretty(list.chats())?);
            return Ok(());
        }
        if list.is_empty() {
            println!("No chats in {}.", database);
            return Ok(());
        }

        let mut table = Table::new();
        table.add_row(row!["ID", "Title", "Created", "Starred"]);
        for chat in list.chats() {
            table.add_row(row![
                chat.id,
                chat.title,
                chat.created_at.format("%Y-%m-%d %H:%M"),
                if chat.starred { "★" } else { "" }
            ]);
        }
        table.printstd();
        Ok(())
    }
}

// Describe command handler
pub mod describe {
    //! Show or replace a database description.

    use super::*;
    use crate::directory::Directory;

    /// Print the description, or save `text` (trimmed) when given
    pub async fn describe(config: &Config, database: &str, text: Option<String>) -> Result<()> {
        let directory = directory(config)?;
        match text {
            Some(text) => {
                let text = text.trim();
                directory.put_description(database, text).await?;
                tracing::info!(database, "Description updated");
                println!("Saved description of {}.", database);
            }
            None => {
                let description = directory.get_description(database).await?;
                if description.is_empty() {
                    println!("{} has no description.", database);
                } else {
                    println!("{}", description);
                }
            }
        }
        Ok(())
    }
}

// Fetch command handler
pub mod fetch {
    //! Download a chat attachment.

    use super::*;
    use crate::directory::Directory;
    use crate::protocol::ChatId;
    use std::path::Path;

    /// Save attachment `name` of `chat` to `output` (default: `./name`)
    pub async fn fetch(
        config: &Config,
        database: &str,
        chat: ChatId,
        name: &str,
        output: Option<PathBuf>,
    ) -> Result<()> {
        let bytes = directory(config)?.fetch_file(database, chat, name).await?;
        let output = output.unwrap_or_else(|| {
            Path::new(name)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("attachment"))
        });
        tokio::fs::write(&output, &bytes).await?;
        println!("Saved {} ({} bytes) to {}", name, bytes.len(), output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line_is_empty() {
        assert_eq!(interpret_line("   ").unwrap(), LineInput::Empty);
    }

    #[test]
    fn test_message_is_trimmed() {
        assert_eq!(
            interpret_line("  explain this plan \n").unwrap(),
            LineInput::Action(UserAction::Send("explain this plan".to_string()))
        );
    }

    #[test]
    fn test_describe_without_text_shows_description() {
        assert_eq!(
            interpret_line("/describe").unwrap(),
            LineInput::Action(UserAction::ShowDescription)
        );
        assert_eq!(
            interpret_line("/describe  Orders ").unwrap(),
            LineInput::Action(UserAction::EditDescription("Orders".to_string()))
        );
    }

    #[test]
    fn test_fetch_defaults_output_to_name() {
        assert_eq!(
            interpret_line("/fetch plan.sql").unwrap(),
            LineInput::Action(UserAction::FetchAttachment {
                name: "plan.sql".to_string(),
                output: PathBuf::from("plan.sql"),
            })
        );
    }

    #[test]
    fn test_exit_and_errors() {
        assert_eq!(interpret_line("quit").unwrap(), LineInput::Exit);
        assert!(interpret_line("/bogus").is_err());
    }
}
