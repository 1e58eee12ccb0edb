use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use dbachat::client::ChatClient;
use dbachat::config::Config;
use dbachat::directory::MemoryDirectory;
use dbachat::presentation::{PlainRenderer, Presenter, Theme};
use dbachat::protocol::{ChatId, ChatSummary, DatabaseInfo};
use dbachat::reconciler::{ConversationView, Entry, ViewUpdate};
use dbachat::session::ConnectionStatus;
use dbachat::store::ClientStore;
use dbachat::transport::fake::{FakeTransport, FakeTransportHandle};

/// Presenter that remembers everything it was asked to show
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub updates: Vec<ViewUpdate>,
    pub connection: Vec<ConnectionStatus>,
    pub chat_lists: Vec<Vec<ChatId>>,
    pub databases: Vec<Vec<String>>,
    pub descriptions: Vec<(String, String)>,
    pub infos: Vec<String>,
    pub themes: Vec<Theme>,
    pub last_view: Option<ConversationView>,
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, update: &ViewUpdate, view: &ConversationView) {
        self.updates.push(update.clone());
        self.last_view = Some(view.clone());
    }

    fn connection_changed(&mut self, status: ConnectionStatus) {
        self.connection.push(status);
    }

    fn chats_changed(&mut self, _database: &str, chats: &[ChatSummary]) {
        self.chat_lists.push(chats.iter().map(|c| c.id).collect());
    }

    fn databases_changed(&mut self, databases: &[DatabaseInfo]) {
        self.databases
            .push(databases.iter().map(|d| d.name.clone()).collect());
    }

    fn description_loaded(&mut self, database: &str, description: &str) {
        self.descriptions
            .push((database.to_string(), description.to_string()));
    }

    fn info(&mut self, message: &str) {
        self.infos.push(message.to_string());
    }

    fn theme_changed(&mut self, theme: Theme) {
        self.themes.push(theme);
    }
}

#[allow(dead_code)]
pub fn chat(id: ChatId, title: &str) -> ChatSummary {
    ChatSummary {
        id,
        title: title.to_string(),
        created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(id),
        starred: false,
    }
}

/// Client wired to a fake transport and an in-memory directory
#[allow(dead_code)]
pub fn client_with(
    directory: MemoryDirectory,
    store: Option<ClientStore>,
) -> (ChatClient, FakeTransportHandle, Arc<MemoryDirectory>) {
    let (transport, handle) = FakeTransport::new();
    let directory = Arc::new(directory);
    let client = ChatClient::new(
        &Config::default(),
        Arc::new(transport),
        directory.clone(),
        Arc::new(PlainRenderer),
        store,
    );
    (client, handle, directory)
}

/// Apply every directory result that arrives within a short quiet period
#[allow(dead_code)]
pub async fn settle(client: &mut ChatClient) {
    while let Ok(true) =
        tokio::time::timeout(Duration::from_millis(100), client.process_next_completion()).await
    {}
}

#[allow(dead_code)]
pub fn last_error(client: &ChatClient) -> Option<String> {
    client
        .reconciler()
        .view()
        .entries
        .iter()
        .rev()
        .find_map(|e| match e {
            Entry::Error(message) => Some(message.clone()),
            _ => None,
        })
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
