//! Client-local preference store
//!
//! Remembers the last database, the last chat of each database, the theme
//! and the role between runs, using an embedded `sled` key-value database.
//! Nothing here is authoritative: the server owns chats and databases, so
//! remembered ids that no longer exist are simply ignored by the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sled::Db;

use crate::error::{DbaChatError, Result};
use crate::presentation::Theme;
use crate::protocol::{ChatId, Role};

const PREFERENCES_KEY: &[u8] = b"preferences";

/// Remembered client preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Preferences {
    /// Database active when the client last ran
    #[serde(default)]
    pub last_database: Option<String>,
    /// Last chat opened in each database
    #[serde(default)]
    pub last_chats: BTreeMap<String, ChatId>,
    /// Colour theme
    #[serde(default)]
    pub theme: Theme,
    /// Assistant role; `None` means use the configured default
    #[serde(default)]
    pub role: Option<Role>,
}

impl Preferences {
    /// Last chat opened in `database`
    pub fn last_chat(&self, database: &str) -> Option<ChatId> {
        self.last_chats.get(database).copied()
    }

    /// Record the chat now active in `database`; `None` forgets it
    pub fn remember_chat(&mut self, database: &str, chat: Option<ChatId>) {
        match chat {
            Some(id) => {
                self.last_chats.insert(database.to_string(), id);
            }
            None => {
                self.last_chats.remove(database);
            }
        }
    }
}

/// Persistent storage for [`Preferences`]
#[derive(Debug, Clone)]
pub struct ClientStore {
    db: Db,
}

impl ClientStore {
    /// Open (or create) the store at `path`
    ///
    /// # Errors
    ///
    /// Returns `DbaChatError::Storage` if the database cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dbachat::store::ClientStore;
    ///
    /// # fn main() -> dbachat::error::Result<()> {
    /// let store = ClientStore::open("/tmp/dbachat-state")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| DbaChatError::Storage(format!("Failed to open state store: {}", e)))?;
        Ok(Self { db })
    }

    /// Open the store in `state_dir`, or in the platform data directory
    pub fn open_in(state_dir: Option<&Path>) -> Result<Self> {
        let dir = match state_dir {
            Some(dir) => dir.to_path_buf(),
            None => Self::default_dir()?,
        };
        std::fs::create_dir_all(&dir).map_err(|e| {
            DbaChatError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        tracing::debug!("Opening state store in {}", dir.display());
        Self::open(dir.join("state.db"))
    }

    /// Platform data directory for this application
    pub fn default_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "dbachat", "dbachat")
            .ok_or_else(|| DbaChatError::Storage("Could not determine data directory".into()))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Load preferences; defaults when nothing was saved yet
    ///
    /// # Errors
    ///
    /// Returns `DbaChatError::Storage` if reading or decoding fails
    pub fn load(&self) -> Result<Preferences> {
        match self
            .db
            .get(PREFERENCES_KEY)
            .map_err(|e| DbaChatError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let prefs = serde_json::from_slice(&bytes)
                    .map_err(|e| DbaChatError::Storage(format!("Deserialization failed: {}", e)))?;
                Ok(prefs)
            }
            None => Ok(Preferences::default()),
        }
    }

    /// Persist preferences and flush to disk
    ///
    /// # Errors
    ///
    /// Returns `DbaChatError::Storage` if encoding or writing fails
    pub fn save(&self, prefs: &Preferences) -> Result<()> {
        let value = serde_json::to_vec(prefs)
            .map_err(|e| DbaChatError::Storage(format!("Serialization failed: {}", e)))?;
        self.db
            .insert(PREFERENCES_KEY, value)
            .map_err(|e| DbaChatError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| DbaChatError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    /// Load, modify and save in one step
    pub fn update(&self, change: impl FnOnce(&mut Preferences)) -> Result<Preferences> {
        let mut prefs = self.load()?;
        change(&mut prefs);
        self.save(&prefs)?;
        Ok(prefs)
    }
}
