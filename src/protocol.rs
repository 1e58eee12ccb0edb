//! Wire types shared with the database-assistant server
//!
//! Socket traffic is JSON objects tagged by `type`. Client events announce
//! context (database, chat, role) and submit messages; server events carry
//! streamed output, tool progress and chat lifecycle notifications.
//!
//! Every server event that belongs to a conversation may carry a `chat_id`
//! tag. The reconciler uses it to drop output that belongs to a chat the
//! user has already navigated away from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned chat identifier
pub type ChatId = i64;

/// Title used when nothing better can be derived
pub const DEFAULT_CHAT_TITLE: &str = "New chat";

/// Assistant persona announced to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// General database assistant
    #[default]
    Assistant,
    /// SQL Server DBA and query-tuning specialist
    Dba,
}

impl Role {
    /// Parse a role from user input
    ///
    /// # Examples
    ///
    /// ```
    /// use dbachat::protocol::Role;
    ///
    /// assert_eq!(Role::parse_str("DBA").unwrap(), Role::Dba);
    /// assert!(Role::parse_str("admin").is_err());
    /// ```
    pub fn parse_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "assistant" => Ok(Self::Assistant),
            "dba" => Ok(Self::Dba),
            other => Err(format!("Unknown role: {}", other)),
        }
    }

    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Dba => "dba",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-owned summary of one chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Chat identifier
    pub id: ChatId,
    /// Display title
    pub title: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Whether the chat is pinned to the top of the list
    #[serde(default)]
    pub starred: bool,
}

/// One persisted message replayed by `history_loaded`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// `user`, `assistant` or `system`
    pub role: String,
    /// Message body
    pub content: String,
}

/// Database entry as listed by the directory service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name, which is also its identifier
    pub name: String,
    /// Free-form description maintained by users
    #[serde(default)]
    pub description: String,
}

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Switch the server-side session to a database
    SetDatabase { database: String },
    /// Switch the server-side session to an existing chat
    SetChat { chat_id: ChatId },
    /// Select the assistant persona
    SetRole { role: Role },
    /// Create a chat in the current database
    CreateChat { title: String },
    /// Submit a user message to the current chat
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },
    /// Drop the current chat's messages
    ClearChat,
}

impl ClientEvent {
    /// Event name as it appears in the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetDatabase { .. } => "set_database",
            Self::SetChat { .. } => "set_chat",
            Self::SetRole { .. } => "set_role",
            Self::CreateChat { .. } => "create_chat",
            Self::Message { .. } => "message",
            Self::ClearChat => "clear_chat",
        }
    }
}

/// Events pushed from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Incremental assistant text
    Stream {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// The current turn is complete
    StreamEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// The assistant invoked a tool on behalf of the current turn
    ToolCall {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// Informational notice
    System {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// Server-reported failure
    Error {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// Full message history of the selected chat
    HistoryLoaded {
        #[serde(default)]
        messages: Vec<HistoryMessage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// A `create_chat` request succeeded
    ChatCreated { chat: ChatSummary },
    /// The current chat's messages were removed
    ChatCleared {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
}

impl ServerEvent {
    /// The chat this event is tagged with, if any
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            Self::Stream { chat_id, .. }
            | Self::StreamEnd { chat_id }
            | Self::ToolCall { chat_id, .. }
            | Self::System { chat_id, .. }
            | Self::Error { chat_id, .. }
            | Self::HistoryLoaded { chat_id, .. }
            | Self::ChatCleared { chat_id } => *chat_id,
            Self::ChatCreated { chat } => Some(chat.id),
        }
    }

    /// Event name as it appears in the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stream { .. } => "stream",
            Self::StreamEnd { .. } => "stream_end",
            Self::ToolCall { .. } => "tool_call",
            Self::System { .. } => "system",
            Self::Error { .. } => "error",
            Self::HistoryLoaded { .. } => "history_loaded",
            Self::ChatCreated { .. } => "chat_created",
            Self::ChatCleared { .. } => "chat_cleared",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_without_attachments_omits_field() {
        let event = ClientEvent::Message {
            content: "show me slow queries".to_string(),
            attachments: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "message", "content": "show me slow queries"})
        );
    }

    #[test]
    fn test_set_role_uses_snake_case() {
        let value = serde_json::to_value(ClientEvent::SetRole { role: Role::Dba }).unwrap();
        assert_eq!(value, json!({"type": "set_role", "role": "dba"}));
    }

    #[test]
    fn test_clear_chat_serializes_as_bare_tag() {
        let value = serde_json::to_value(ClientEvent::ClearChat).unwrap();
        assert_eq!(value, json!({"type": "clear_chat"}));
    }

    #[test]
    fn test_untagged_stream_event_parses() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"stream","content":"SELECT"}"#).unwrap();
        assert_eq!(
            event,
            ServerEvent::Stream {
                content: "SELECT".to_string(),
                chat_id: None
            }
        );
        assert_eq!(event.chat_id(), None);
    }

    #[test]
    fn test_stream_end_parses_with_and_without_tag() {
        let bare: ServerEvent = serde_json::from_str(r#"{"type":"stream_end"}"#).unwrap();
        assert_eq!(bare, ServerEvent::StreamEnd { chat_id: None });

        let tagged: ServerEvent =
            serde_json::from_str(r#"{"type":"stream_end","chat_id":7}"#).unwrap();
        assert_eq!(tagged.chat_id(), Some(7));
    }

    #[test]
    fn test_tool_call_keeps_arguments() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"tool_call","tool":"get_indexes","args":{"table_name":"Orders"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::ToolCall { tool, args, .. } => {
                assert_eq!(tool, "get_indexes");
                assert_eq!(args["table_name"], "Orders");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_chat_created_parses_server_timestamp() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"chat_created","chat":{"id":42,"title":"show me slow queries","created_at":"2025-03-01T10:15:00Z","starred":false}}"#,
        )
        .unwrap();
        assert_eq!(event.chat_id(), Some(42));
        assert_eq!(event.kind(), "chat_created");
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = serde_json::from_str::<ServerEvent>(r#"{"type":"telemetry"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!(Role::parse_str("assistant").unwrap(), Role::Assistant);
        assert_eq!(Role::Dba.to_string(), "dba");
        assert_eq!(Role::default(), Role::Assistant);
    }
}
