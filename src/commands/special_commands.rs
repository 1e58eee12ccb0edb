//! Special commands parser for interactive chat
//!
//! Lines starting with `/` are commands that change the client's context
//! or manage chats instead of being sent to the assistant:
//! - Switch database or chat, start a new chat
//! - Star, rename, delete and clear chats
//! - Attach files and fetch stored attachments
//! - Edit the database description, change role or theme
//!
//! Command names are case-insensitive; arguments keep their case.

use std::path::PathBuf;

use thiserror::Error;

use crate::presentation::Theme;
use crate::protocol::{ChatId, Role};

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
///
/// A `None` chat id means the active chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Make a database active
    SelectDatabase(String),

    /// List databases with their descriptions
    ListDatabases,

    /// Open a chat of the active database
    SelectChat(ChatId),

    /// List chats of the active database
    ListChats,

    /// Start a chat that is created on first send
    NewChat,

    /// Star or unstar a chat
    Star { chat: Option<ChatId>, starred: bool },

    /// Rename a chat
    Rename { chat: Option<ChatId>, title: String },

    /// Delete a chat
    Delete(Option<ChatId>),

    /// Clear the conversation of the active chat
    Clear,

    /// Change the assistant role
    SetRole(Role),

    /// Stage a file for the next message
    Attach(PathBuf),

    /// Show the description, or replace it with the given text
    Describe(Option<String>),

    /// Download an attachment of the active chat
    Fetch { name: String, output: Option<PathBuf> },

    /// Set or toggle the colour theme
    Theme(Option<Theme>),

    /// Display connection and context
    ShowStatus,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command
    ///
    /// The input should be sent as a regular message.
    None,
}

/// Parse user input into a special command
///
/// # Errors
///
/// Returns CommandError::UnknownCommand if input starts with "/" but is not a valid command.
/// Returns CommandError::UnsupportedArgument if a command receives an invalid argument.
/// Returns CommandError::MissingArgument if a command requires an argument but none was provided.
///
/// # Examples
///
/// ```
/// use dbachat::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// let cmd = parse_special_command("/db Sales").unwrap();
/// assert_eq!(cmd, SpecialCommand::SelectDatabase("Sales".to_string()));
///
/// let cmd = parse_special_command("show me slow queries").unwrap();
/// assert_eq!(cmd, SpecialCommand::None);
///
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') {
        return Ok(match lower.as_str() {
            "exit" | "quit" => SpecialCommand::Exit,
            _ => SpecialCommand::None,
        });
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command.to_lowercase(), rest.trim()),
        None => (lower.clone(), ""),
    };
    let arg = (!rest.is_empty()).then_some(rest);

    match command.as_str() {
        "/db" | "/database" => required(&command, arg, "/db <name>")
            .map(|name| SpecialCommand::SelectDatabase(name.to_string())),
        "/dbs" | "/databases" => Ok(SpecialCommand::ListDatabases),
        "/chat" => {
            let id = required(&command, arg, "/chat <id>")?;
            chat_id(&command, id).map(SpecialCommand::SelectChat)
        }
        "/chats" => Ok(SpecialCommand::ListChats),
        "/new" => Ok(SpecialCommand::NewChat),
        "/star" | "/unstar" => Ok(SpecialCommand::Star {
            chat: arg.map(|id| chat_id(&command, id)).transpose()?,
            starred: command == "/star",
        }),
        "/delete" => Ok(SpecialCommand::Delete(
            arg.map(|id| chat_id(&command, id)).transpose()?,
        )),
        "/rename" => {
            let rest = required(&command, arg, "/rename [id] <title>")?;
            // a leading number followed by more words names the chat
            let (chat, title) = match rest.split_once(char::is_whitespace) {
                Some((first, title)) if first.parse::<ChatId>().is_ok() => {
                    (first.parse::<ChatId>().ok(), title.trim())
                }
                _ => (None, rest),
            };
            Ok(SpecialCommand::Rename {
                chat,
                title: title.to_string(),
            })
        }
        "/clear" => Ok(SpecialCommand::Clear),
        "/role" => {
            let role = required(&command, arg, "/role <assistant|dba>")?;
            Role::parse_str(role)
                .map(SpecialCommand::SetRole)
                .map_err(|_| unsupported(&command, role))
        }
        "/attach" => required(&command, arg, "/attach <path>")
            .map(|path| SpecialCommand::Attach(PathBuf::from(path))),
        "/describe" => Ok(SpecialCommand::Describe(arg.map(str::to_string))),
        "/fetch" => {
            let rest = required(&command, arg, "/fetch <name> [output]")?;
            let mut parts = rest.split_whitespace();
            let name = parts.next().unwrap_or(rest).to_string();
            let output = parts.next().map(PathBuf::from);
            Ok(SpecialCommand::Fetch { name, output })
        }
        "/theme" => match arg {
            None => Ok(SpecialCommand::Theme(None)),
            Some(theme) => Theme::parse_str(theme)
                .map(|t| SpecialCommand::Theme(Some(t)))
                .map_err(|_| unsupported(&command, theme)),
        },
        "/status" => Ok(SpecialCommand::ShowStatus),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(command)),
    }
}

fn required<'a>(command: &str, arg: Option<&'a str>, usage: &str) -> Result<&'a str, CommandError> {
    arg.ok_or_else(|| CommandError::MissingArgument {
        command: command.to_string(),
        usage: usage.to_string(),
    })
}

fn unsupported(command: &str, arg: &str) -> CommandError {
    CommandError::UnsupportedArgument {
        command: command.to_string(),
        arg: arg.to_string(),
    }
}

fn chat_id(command: &str, arg: &str) -> Result<ChatId, CommandError> {
    arg.trim()
        .trim_start_matches('#')
        .parse()
        .map_err(|_| unsupported(command, arg))
}

/// Help text for special commands
pub fn help_text() -> &'static str {
    r#"
Special Commands for Interactive Chat
=====================================

CONTEXT:
  /db <name>          - Switch to a database
  /dbs                - List databases
  /chat <id>          - Open a chat of the current database
  /chats              - List chats of the current database
  /new                - Start a new chat (created on first message)

CHATS:
  /star [id]          - Star a chat (current chat by default)
  /unstar [id]        - Remove the star
  /rename [id] <title> - Rename a chat
  /delete [id]        - Delete a chat
  /clear              - Clear the current conversation

MESSAGES:
  /attach <path>      - Attach a file to the next message
  /fetch <name> [out] - Download an attachment of the current chat

SETTINGS:
  /describe [text]    - Show or edit the database description
  /role <assistant|dba> - Change the assistant role
  /theme [light|dark] - Set or toggle the colour theme

SESSION:
  /status             - Show connection and context
  /help               - Show this help message
  /?                  - Same as /help
  exit                - Exit interactive mode
  quit                - Same as exit

NOTES:
  - Command names are case-insensitive
  - Regular text (not starting with /) is sent to the assistant
  - The first message of a new chat creates it and names it
"#
}

/// Display help text for special commands
///
/// # Examples
///
/// ```
/// use dbachat::commands::special_commands::print_help;
///
/// print_help();
/// ```
pub fn print_help() {
    println!("{}", help_text());
}
