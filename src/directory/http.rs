//! `reqwest` implementation of the directory service
//!
//! Every call maps to one request under `{base}/api`. Non-success
//! statuses become [`DbaChatError::Server`] carrying the server's own
//! message when the body has one.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::attachments::Attachment;
use crate::directory::Directory;
use crate::error::{DbaChatError, Result};
use crate::protocol::{ChatId, ChatSummary, DatabaseInfo};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DatabaseEntry {
    Name(String),
    Info(DatabaseInfo),
}

impl From<DatabaseEntry> for DatabaseInfo {
    fn from(entry: DatabaseEntry) -> Self {
        match entry {
            DatabaseEntry::Name(name) => DatabaseInfo {
                name,
                description: String::new(),
            },
            DatabaseEntry::Info(info) => info,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DatabasesBody {
    #[serde(default)]
    databases: Vec<DatabaseEntry>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DescriptionBody {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChatsBody {
    #[serde(default)]
    chats: Vec<ChatSummary>,
}

#[derive(Debug, Serialize)]
struct TitleBody<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct StarBody {
    starred: bool,
}

#[derive(Debug, Deserialize)]
struct FilesBody {
    #[serde(default)]
    files: Vec<String>,
}

/// `reqwest` implementation of [`Directory`]
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    base: url::Url,
}

impl HttpDirectory {
    /// Create a client for the service at `base`
    ///
    /// No network I/O is performed at construction time.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or `base`
    /// cannot carry a path.
    pub fn new(base: url::Url, timeout: Duration) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(DbaChatError::Config(format!("Invalid server URL: {}", base)).into());
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// Base URL of the service
    pub fn base(&self) -> &url::Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<url::Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DbaChatError::Config(format!("Invalid server URL: {}", self.base)))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: url::Url) -> Result<Response> {
        tracing::debug!("{} {}", method, url);
        self.execute(self.client.request(method, url)).await
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(status, &body);
        tracing::warn!(status = status.as_u16(), "Directory request failed: {}", message);
        Err(DbaChatError::Server {
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Pull a readable message out of an error body
fn error_message(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(alias = "detail", alias = "message")]
        error: String,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait::async_trait]
impl Directory for HttpDirectory {
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        let url = self.endpoint(&["databases"])?;
        let body: DatabasesBody = Self::json(self.request(Method::GET, url).await?).await?;
        if let Some(error) = body.error.filter(|e| !e.is_empty()) {
            if body.databases.is_empty() {
                return Err(DbaChatError::Server {
                    status: StatusCode::OK.as_u16(),
                    message: error,
                }
                .into());
            }
            tracing::warn!("Database listing reported: {}", error);
        }
        Ok(body.databases.into_iter().map(DatabaseInfo::from).collect())
    }

    async fn get_description(&self, database: &str) -> Result<String> {
        let url = self.endpoint(&["databases", database, "description"])?;
        let body: DescriptionBody = Self::json(self.request(Method::GET, url).await?).await?;
        Ok(body.description)
    }

    async fn put_description(&self, database: &str, description: &str) -> Result<()> {
        let url = self.endpoint(&["databases", database, "description"])?;
        let body = DescriptionBody {
            description: description.to_string(),
        };
        self.execute(self.client.put(url).json(&body)).await?;
        tracing::debug!(database, "Description saved");
        Ok(())
    }

    async fn list_chats(&self, database: &str) -> Result<Vec<ChatSummary>> {
        let url = self.endpoint(&["databases", database, "chats"])?;
        let body: ChatsBody = Self::json(self.request(Method::GET, url).await?).await?;
        Ok(body.chats)
    }

    async fn create_chat(&self, database: &str, title: &str) -> Result<ChatSummary> {
        let url = self.endpoint(&["databases", database, "chats"])?;
        let response = self
            .execute(self.client.post(url).json(&TitleBody { title }))
            .await?;
        Self::json(response).await
    }

    async fn delete_chat(&self, database: &str, chat: ChatId) -> Result<()> {
        let id = chat.to_string();
        let url = self.endpoint(&["databases", database, "chats", &id])?;
        self.request(Method::DELETE, url).await?;
        Ok(())
    }

    async fn rename_chat(&self, database: &str, chat: ChatId, title: &str) -> Result<()> {
        let id = chat.to_string();
        let url = self.endpoint(&["databases", database, "chats", &id, "title"])?;
        self.execute(self.client.patch(url).json(&TitleBody { title }))
            .await?;
        Ok(())
    }

    async fn star_chat(&self, database: &str, chat: ChatId, starred: bool) -> Result<()> {
        let id = chat.to_string();
        let url = self.endpoint(&["databases", database, "chats", &id, "star"])?;
        self.execute(self.client.patch(url).json(&StarBody { starred }))
            .await?;
        Ok(())
    }

    async fn upload_files(
        &self,
        database: &str,
        chat: ChatId,
        files: &[Attachment],
    ) -> Result<Vec<String>> {
        let id = chat.to_string();
        let url = self.endpoint(&["databases", database, "chats", &id, "files"])?;
        let form = files.iter().fold(Form::new(), |form, file| {
            form.part(
                "files",
                Part::bytes(file.bytes.clone()).file_name(file.name.clone()),
            )
        });
        tracing::debug!(count = files.len(), chat_id = chat, "Uploading attachments");
        let response = self.execute(self.client.post(url).multipart(form)).await?;
        let body: FilesBody = Self::json(response).await?;
        Ok(body.files)
    }

    async fn fetch_file(&self, database: &str, chat: ChatId, name: &str) -> Result<Vec<u8>> {
        let id = chat.to_string();
        let url = self.endpoint(&["databases", database, "chats", &id, "files", name])?;
        let response = self.request(Method::GET, url).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
