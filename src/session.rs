//! Session state: the single source of truth for the active context
//!
//! Holds the active database, the active chat, the selected role and the
//! connection status. Every change goes through a named transition that
//! returns the context announcements the server should receive. The
//! transitions perform no I/O themselves; the controller sends the
//! announcements and runs the side effects.
//!
//! Announcements are idempotent. After every reconnect the full context is
//! announced again via [`SessionState::announcements`].

use crate::error::{DbaChatError, Result};
use crate::protocol::{ChatId, ClientEvent, Role};
use std::fmt;

/// Binary connection status surfaced to the presenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// The socket is open
    Connected,
    /// The socket is closed or was never opened
    #[default]
    Disconnected,
}

impl ConnectionStatus {
    /// True when the socket is open
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Active database/chat pair plus role and connection status
///
/// A chat is only meaningful together with the database it belongs to:
/// selecting a database always clears the chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    database: Option<String>,
    chat: Option<ChatId>,
    role: Role,
    connection: ConnectionStatus,
}

impl SessionState {
    /// Create an empty session with the given role
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    /// Active database, if any
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Active chat, if any
    pub fn chat(&self) -> Option<ChatId> {
        self.chat
    }

    /// Selected role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current connection status
    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    /// Make `database` active and clear the chat
    ///
    /// Returns the announcement to send when connected; nothing while
    /// disconnected, since the reconnect re-announces the context anyway.
    pub fn select_database(&mut self, database: impl Into<String>) -> Vec<ClientEvent> {
        let database = database.into();
        tracing::debug!(database = %database, "Selecting database");
        self.database = Some(database.clone());
        self.chat = None;

        if self.connection.is_connected() {
            vec![ClientEvent::SetDatabase { database }]
        } else {
            Vec::new()
        }
    }

    /// Make `chat` active within the current database
    ///
    /// # Errors
    ///
    /// Returns [`DbaChatError::Validation`] when no database is selected.
    pub fn select_chat(&mut self, chat: ChatId) -> Result<Vec<ClientEvent>> {
        if self.database.is_none() {
            return Err(DbaChatError::Validation("Select a database first".to_string()).into());
        }
        tracing::debug!(chat_id = chat, "Selecting chat");
        self.chat = Some(chat);

        if self.connection.is_connected() {
            Ok(vec![ClientEvent::SetChat { chat_id: chat }])
        } else {
            Ok(Vec::new())
        }
    }

    /// Record a chat the server just created as active
    ///
    /// The server already scoped its session to the new chat when it
    /// confirmed creation, so nothing needs to be announced.
    pub fn adopt_created_chat(&mut self, chat: ChatId) {
        self.chat = Some(chat);
    }

    /// Switch to a chat that does not exist yet
    pub fn start_new_chat(&mut self) {
        self.chat = None;
    }

    /// Change the role and return the announcement when connected
    pub fn set_role(&mut self, role: Role) -> Vec<ClientEvent> {
        self.role = role;
        if self.connection.is_connected() {
            vec![ClientEvent::SetRole { role }]
        } else {
            Vec::new()
        }
    }

    /// Record a connection status change
    ///
    /// Returns true when the status actually changed.
    pub fn set_connection(&mut self, status: ConnectionStatus) -> bool {
        let changed = self.connection != status;
        self.connection = status;
        changed
    }

    /// Full context announcement, sent after every (re)connect
    ///
    /// Role first, then database, then chat, so the server can resume the
    /// right session scope.
    pub fn announcements(&self) -> Vec<ClientEvent> {
        let mut events = vec![ClientEvent::SetRole { role: self.role }];
        if let Some(database) = &self.database {
            events.push(ClientEvent::SetDatabase {
                database: database.clone(),
            });
            if let Some(chat_id) = self.chat {
                events.push(ClientEvent::SetChat { chat_id });
            }
        }
        events
    }
}
