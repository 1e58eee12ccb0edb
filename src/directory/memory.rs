//! In-memory directory service for tests
//!
//! [`MemoryDirectory`] keeps databases, chats and files in memory, records
//! every call in order, and can be told to fail a given operation so error
//! paths can be exercised without a server.
//!
//! ```
//! use dbachat::directory::memory::{DirectoryCall, MemoryDirectory};
//! use dbachat::directory::Directory;
//!
//! # tokio_test::block_on(async {
//! let directory = MemoryDirectory::new().with_database("Sales", "orders");
//! assert_eq!(directory.get_description("Sales").await.unwrap(), "orders");
//! assert_eq!(
//!     directory.calls(),
//!     vec![DirectoryCall::GetDescription { database: "Sales".to_string() }]
//! );
//! # });
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::attachments::Attachment;
use crate::directory::Directory;
use crate::error::{DbaChatError, Result};
use crate::protocol::{ChatId, ChatSummary, DatabaseInfo};

/// One recorded directory call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    ListDatabases,
    GetDescription { database: String },
    PutDescription { database: String, description: String },
    ListChats { database: String },
    CreateChat { database: String, title: String },
    DeleteChat { database: String, chat: ChatId },
    RenameChat { database: String, chat: ChatId, title: String },
    StarChat { database: String, chat: ChatId, starred: bool },
    UploadFiles { database: String, chat: ChatId, names: Vec<String> },
    FetchFile { database: String, chat: ChatId, name: String },
}

impl DirectoryCall {
    /// Operation name, as accepted by [`MemoryDirectory::fail`]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::ListDatabases => "list_databases",
            Self::GetDescription { .. } => "get_description",
            Self::PutDescription { .. } => "put_description",
            Self::ListChats { .. } => "list_chats",
            Self::CreateChat { .. } => "create_chat",
            Self::DeleteChat { .. } => "delete_chat",
            Self::RenameChat { .. } => "rename_chat",
            Self::StarChat { .. } => "star_chat",
            Self::UploadFiles { .. } => "upload_files",
            Self::FetchFile { .. } => "fetch_file",
        }
    }
}

#[derive(Debug, Default)]
struct State {
    databases: Vec<DatabaseInfo>,
    chats: HashMap<String, Vec<ChatSummary>>,
    files: HashMap<(String, ChatId, String), Vec<u8>>,
    failures: HashMap<String, String>,
    calls: Vec<DirectoryCall>,
    next_chat_id: ChatId,
}

/// In-memory [`Directory`]
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a database
    pub fn with_database(self, name: &str, description: &str) -> Self {
        {
            let mut state = self.lock();
            state.databases.push(DatabaseInfo {
                name: name.to_string(),
                description: description.to_string(),
            });
            state.chats.entry(name.to_string()).or_default();
        }
        self
    }

    /// Add an existing chat to a database
    pub fn with_chat(self, database: &str, chat: ChatSummary) -> Self {
        {
            let mut state = self.lock();
            state.next_chat_id = state.next_chat_id.max(chat.id);
            state.chats.entry(database.to_string()).or_default().push(chat);
        }
        self
    }

    /// Add a stored attachment
    pub fn with_file(self, database: &str, chat: ChatId, name: &str, bytes: &[u8]) -> Self {
        self.lock()
            .files
            .insert((database.to_string(), chat, name.to_string()), bytes.to_vec());
        self
    }

    /// Make every later call of `operation` fail with `message`
    pub fn fail(&self, operation: &str, message: &str) {
        self.lock()
            .failures
            .insert(operation.to_string(), message.to_string());
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `operation` made so far
    pub fn count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Current chats of a database
    pub fn chats(&self, database: &str) -> Vec<ChatSummary> {
        self.lock().chats.get(database).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `call` and return the locked state, or the injected failure
    fn record(&self, call: DirectoryCall) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        let operation = call.operation();
        state.calls.push(call);
        if let Some(message) = state.failures.get(operation) {
            return Err(DbaChatError::Server {
                status: 500,
                message: message.clone(),
            }
            .into());
        }
        Ok(state)
    }
}

fn unknown_database(database: &str) -> anyhow::Error {
    DbaChatError::Server {
        status: 404,
        message: format!("Unknown database: {}", database),
    }
    .into()
}

fn unknown_chat(chat: ChatId) -> anyhow::Error {
    DbaChatError::Server {
        status: 404,
        message: format!("Unknown chat: {}", chat),
    }
    .into()
}

fn find_chat<'a>(
    state: &'a mut State,
    database: &str,
    chat: ChatId,
) -> Result<&'a mut ChatSummary> {
    state
        .chats
        .get_mut(database)
        .ok_or_else(|| unknown_database(database))?
        .iter_mut()
        .find(|c| c.id == chat)
        .ok_or_else(|| unknown_chat(chat))
}

#[async_trait::async_trait]
impl Directory for MemoryDirectory {
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        let state = self.record(DirectoryCall::ListDatabases)?;
        Ok(state.databases.clone())
    }

    async fn get_description(&self, database: &str) -> Result<String> {
        let state = self.record(DirectoryCall::GetDescription {
            database: database.to_string(),
        })?;
        state
            .databases
            .iter()
            .find(|d| d.name == database)
            .map(|d| d.description.clone())
            .ok_or_else(|| unknown_database(database))
    }

    async fn put_description(&self, database: &str, description: &str) -> Result<()> {
        let mut state = self.record(DirectoryCall::PutDescription {
            database: database.to_string(),
            description: description.to_string(),
        })?;
        let info = state
            .databases
            .iter_mut()
            .find(|d| d.name == database)
            .ok_or_else(|| unknown_database(database))?;
        info.description = description.to_string();
        Ok(())
    }

    async fn list_chats(&self, database: &str) -> Result<Vec<ChatSummary>> {
        let state = self.record(DirectoryCall::ListChats {
            database: database.to_string(),
        })?;
        state
            .chats
            .get(database)
            .cloned()
            .ok_or_else(|| unknown_database(database))
    }

    async fn create_chat(&self, database: &str, title: &str) -> Result<ChatSummary> {
        let mut state = self.record(DirectoryCall::CreateChat {
            database: database.to_string(),
            title: title.to_string(),
        })?;
        state.next_chat_id += 1;
        let chat = ChatSummary {
            id: state.next_chat_id,
            title: title.to_string(),
            created_at: Utc::now(),
            starred: false,
        };
        state
            .chats
            .get_mut(database)
            .ok_or_else(|| unknown_database(database))?
            .push(chat.clone());
        Ok(chat)
    }

    async fn delete_chat(&self, database: &str, chat: ChatId) -> Result<()> {
        let mut state = self.record(DirectoryCall::DeleteChat {
            database: database.to_string(),
            chat,
        })?;
        let chats = state
            .chats
            .get_mut(database)
            .ok_or_else(|| unknown_database(database))?;
        let before = chats.len();
        chats.retain(|c| c.id != chat);
        if chats.len() == before {
            return Err(unknown_chat(chat));
        }
        Ok(())
    }

    async fn rename_chat(&self, database: &str, chat: ChatId, title: &str) -> Result<()> {
        let mut state = self.record(DirectoryCall::RenameChat {
            database: database.to_string(),
            chat,
            title: title.to_string(),
        })?;
        find_chat(&mut state, database, chat)?.title = title.to_string();
        Ok(())
    }

    async fn star_chat(&self, database: &str, chat: ChatId, starred: bool) -> Result<()> {
        let mut state = self.record(DirectoryCall::StarChat {
            database: database.to_string(),
            chat,
            starred,
        })?;
        find_chat(&mut state, database, chat)?.starred = starred;
        Ok(())
    }

    async fn upload_files(
        &self,
        database: &str,
        chat: ChatId,
        files: &[Attachment],
    ) -> Result<Vec<String>> {
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let mut state = self.record(DirectoryCall::UploadFiles {
            database: database.to_string(),
            chat,
            names: names.clone(),
        })?;
        for file in files {
            state.files.insert(
                (database.to_string(), chat, file.name.clone()),
                file.bytes.clone(),
            );
        }
        Ok(names)
    }

    async fn fetch_file(&self, database: &str, chat: ChatId, name: &str) -> Result<Vec<u8>> {
        let state = self.record(DirectoryCall::FetchFile {
            database: database.to_string(),
            chat,
            name: name.to_string(),
        })?;
        state
            .files
            .get(&(database.to_string(), chat, name.to_string()))
            .cloned()
            .ok_or_else(|| {
                DbaChatError::Server {
                    status: 404,
                    message: format!("File not found: {}", name),
                }
                .into()
            })
    }
}
