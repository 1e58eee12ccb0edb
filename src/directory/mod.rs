//! Directory service abstraction and implementations
//!
//! Databases, their descriptions, chats and chat attachments are managed
//! over plain HTTP under `/api`. The chat client only talks to the
//! [`Directory`] trait:
//!
//! - [`http::HttpDirectory`] -- `reqwest` client used at runtime.
//! - [`memory::MemoryDirectory`] -- in-memory service used in tests; it
//!   records every call so tests can count requests.
//!
//! All failures are returned to the caller, which shows them; nothing is
//! retried.

use std::fmt;

use crate::attachments::Attachment;
use crate::error::Result;
use crate::protocol::{ChatId, ChatSummary, DatabaseInfo};

pub mod http;
pub mod memory;

pub use http::HttpDirectory;
pub use memory::MemoryDirectory;

/// Operations of the directory service
#[async_trait::async_trait]
pub trait Directory: Send + Sync + fmt::Debug {
    /// List every database the server knows about
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>>;

    /// Description of one database
    async fn get_description(&self, database: &str) -> Result<String>;

    /// Replace the description of one database
    async fn put_description(&self, database: &str, description: &str) -> Result<()>;

    /// Chats of one database, in server order
    async fn list_chats(&self, database: &str) -> Result<Vec<ChatSummary>>;

    /// Create a chat directly over REST
    async fn create_chat(&self, database: &str, title: &str) -> Result<ChatSummary>;

    /// Delete a chat
    async fn delete_chat(&self, database: &str, chat: ChatId) -> Result<()>;

    /// Rename a chat
    async fn rename_chat(&self, database: &str, chat: ChatId, title: &str) -> Result<()>;

    /// Star or unstar a chat
    async fn star_chat(&self, database: &str, chat: ChatId, starred: bool) -> Result<()>;

    /// Upload files into a chat; returns the stored names
    async fn upload_files(
        &self,
        database: &str,
        chat: ChatId,
        files: &[Attachment],
    ) -> Result<Vec<String>>;

    /// Download one stored attachment
    async fn fetch_file(&self, database: &str, chat: ChatId, name: &str) -> Result<Vec<u8>>;
}
