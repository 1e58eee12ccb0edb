//! Chat client controller
//!
//! [`ChatClient`] ties the pieces together: it owns the [`SessionState`],
//! the [`Reconciler`], the cached [`ChatList`] and the description
//! auto-save tracker, and it talks to the server through a [`Transport`]
//! and a [`Directory`].
//!
//! Everything runs on one task. [`ChatClient::run`] selects over user
//! actions, transport events, finished directory calls and the
//! description-save deadline; directory calls are spawned and report back
//! as [`Completion`]s, so the loop never waits on a REST round trip. Each
//! completion carries the database or epoch it was issued for and is
//! ignored when the user has moved on. A failed REST call ends any turn
//! in flight, like an error event from the server.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::attachments::{self, Attachment, AttachmentPolicy};
use crate::chat_list::ChatList;
use crate::config::Config;
use crate::description::{DescriptionAutosave, DescriptionSave};
use crate::directory::Directory;
use crate::error::{DbaChatError, Result};
use crate::presentation::{MarkdownRenderer, Presenter, Theme};
use crate::protocol::{ChatId, ChatSummary, ClientEvent, DatabaseInfo, Role, ServerEvent};
use crate::reconciler::{Dispatch, PendingSend, Reconciler, Submission};
use crate::session::{ConnectionStatus, SessionState};
use crate::store::{ClientStore, Preferences};
use crate::transport::{Transport, TransportEvent};

/// Something the user asked for
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// Make a database active
    SelectDatabase(String),
    /// Open an existing chat of the active database
    SelectChat(ChatId),
    /// Switch to a chat that is created on first send
    NewChat,
    /// Send text together with the staged attachments
    Send(String),
    /// Stage a file for the next send
    Attach(PathBuf),
    /// Stage an in-memory file for the next send
    AttachBytes(Attachment),
    /// Delete a chat of the active database; `None` means the active chat
    DeleteChat(Option<ChatId>),
    /// Star or unstar a chat
    StarChat {
        chat_id: Option<ChatId>,
        starred: bool,
    },
    /// Rename a chat
    RenameChat {
        chat_id: Option<ChatId>,
        title: String,
    },
    /// Change the assistant role
    SetRole(Role),
    /// Clear the active chat's conversation
    ClearChat,
    /// Description text changed
    EditDescription(String),
    /// Description editor lost focus
    BlurDescription,
    /// Show the active database description
    ShowDescription,
    /// Reload the database list
    RefreshDatabases,
    /// Reload the chat list of the active database
    RefreshChats,
    /// Download an attachment of the active chat
    FetchAttachment { name: String, output: PathBuf },
    /// Set the theme; `None` toggles it
    SetTheme(Option<Theme>),
    /// Show connection and context
    ShowStatus,
    /// Leave the client
    Quit,
}

/// Result of a spawned directory call
#[derive(Debug)]
pub enum Completion {
    Databases(std::result::Result<Vec<DatabaseInfo>, String>),
    Chats {
        database: String,
        result: std::result::Result<Vec<ChatSummary>, String>,
    },
    Description {
        database: String,
        result: std::result::Result<String, String>,
    },
    DescriptionSaved {
        database: String,
        description: String,
        result: std::result::Result<(), String>,
    },
    Uploaded {
        epoch: u64,
        result: std::result::Result<Vec<String>, String>,
    },
    ChatUpdated {
        database: String,
        result: std::result::Result<(), String>,
    },
    Fetched {
        name: String,
        output: PathBuf,
        result: std::result::Result<usize, String>,
    },
}

/// Where to resume when the client starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Startup {
    /// Database to open; falls back to the remembered one
    pub database: Option<String>,
    /// Chat to open; falls back to the remembered one for the database
    pub chat: Option<ChatId>,
    /// Role override
    pub role: Option<Role>,
}

/// Non-conversation output waiting for the presenter
#[derive(Debug, Clone, PartialEq)]
enum Notice {
    Connection(ConnectionStatus),
    Chats,
    Databases,
    Description { database: String, text: String },
    Info(String),
    Theme(Theme),
}

/// The chat client controller
pub struct ChatClient {
    session: SessionState,
    reconciler: Reconciler,
    chats: ChatList,
    databases: Vec<DatabaseInfo>,
    description: Option<String>,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn Directory>,
    store: Option<ClientStore>,
    prefs: Preferences,
    autosave: DescriptionAutosave,
    policy: AttachmentPolicy,
    staged: Vec<Attachment>,
    /// Database the unanswered `create_chat` was sent for
    pending_create: Option<String>,
    notices: Vec<Notice>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: Option<mpsc::UnboundedReceiver<Completion>>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("session", &self.session)
            .field("reconciler", &self.reconciler)
            .field("staged", &self.staged.len())
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Create a client
    ///
    /// Preferences are loaded from `store` when present; a store that
    /// cannot be read is logged and treated as empty.
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        renderer: Arc<dyn MarkdownRenderer>,
        store: Option<ClientStore>,
    ) -> Self {
        let prefs = match store.as_ref().map(ClientStore::load).transpose() {
            Ok(prefs) => prefs.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable client state: {}", e);
                Preferences::default()
            }
        };
        let role = prefs.role.unwrap_or(config.chat.default_role);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            session: SessionState::new(role),
            reconciler: Reconciler::new(
                renderer,
                config.chat.autoscroll_threshold,
                config.chat.max_title_length,
            ),
            chats: ChatList::new(),
            databases: Vec::new(),
            description: None,
            transport,
            directory,
            store,
            prefs,
            autosave: DescriptionAutosave::new(config.chat.description_save_delay()),
            policy: AttachmentPolicy::new(&config.attachments),
            staged: Vec::new(),
            pending_create: None,
            notices: Vec::new(),
            completions_tx,
            completions_rx: Some(completions_rx),
        }
    }

    /// Session state
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Turn state machine and conversation view
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Cached chat list of the active database
    pub fn chats(&self) -> &ChatList {
        &self.chats
    }

    /// Last loaded database list
    pub fn databases(&self) -> &[DatabaseInfo] {
        &self.databases
    }

    /// Attachments staged for the next send
    pub fn staged(&self) -> &[Attachment] {
        &self.staged
    }

    /// Remembered preferences
    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    /// Load the database list and restore the remembered context
    pub fn start(&mut self, startup: Startup) {
        if let Some(role) = startup.role {
            self.session.set_role(role);
        }
        self.notices.push(Notice::Theme(self.prefs.theme));
        self.refresh_databases();

        let database = startup.database.or_else(|| self.prefs.last_database.clone());
        if let Some(database) = database {
            let chat = startup.chat.or_else(|| self.prefs.last_chat(&database));
            self.enter_database(&database);
            if let Some(chat) = chat {
                self.enter_chat(chat);
            }
        }
    }

    /// Drive the client until the user quits or the transport goes away
    ///
    /// # Errors
    ///
    /// Returns an error if the loop was already run once.
    pub async fn run(
        mut self,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
        presenter: &mut dyn Presenter,
    ) -> Result<()> {
        let mut completions = self
            .completions_rx
            .take()
            .ok_or_else(|| DbaChatError::Config("Chat client is already running".to_string()))?;
        let transport = Arc::clone(&self.transport);
        let mut events = transport.events();

        self.render(presenter);
        loop {
            self.reconciler
                .set_distance_from_bottom(presenter.distance_from_bottom());
            let deadline = self.autosave.deadline();

            tokio::select! {
                action = actions.recv() => match action {
                    Some(UserAction::Quit) | None => break,
                    Some(action) => self.handle_action(action).await,
                },
                event = events.next() => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        tracing::warn!("Transport event stream ended");
                        break;
                    }
                },
                Some(completion) = completions.recv() => self.handle_completion(completion).await,
                _ = wait_until(deadline) => self.save_description_if_due(Instant::now()),
            }

            self.render(presenter);
        }

        if let Some(save) = self.autosave.flush() {
            if let Err(e) = self
                .directory
                .put_description(&save.database, &save.text)
                .await
            {
                tracing::warn!("Failed to save description on exit: {}", e);
            }
        }
        tracing::info!("Chat client stopped");
        Ok(())
    }

    /// Wait for the next spawned directory call and apply its result
    ///
    /// Returns false when the completion channel has been handed to
    /// [`ChatClient::run`].
    pub async fn process_next_completion(&mut self) -> bool {
        let Some(rx) = self.completions_rx.as_mut() else {
            return false;
        };
        match rx.recv().await {
            Some(completion) => {
                self.handle_completion(completion).await;
                true
            }
            None => false,
        }
    }

    /// Push pending view updates and notices to `presenter`
    pub fn render(&mut self, presenter: &mut dyn Presenter) {
        for update in self.reconciler.take_updates() {
            presenter.present(&update, self.reconciler.view());
        }
        for notice in std::mem::take(&mut self.notices) {
            match notice {
                Notice::Connection(status) => presenter.connection_changed(status),
                Notice::Chats => {
                    let database = self.chats.database().unwrap_or_default().to_string();
                    presenter.chats_changed(&database, self.chats.chats());
                }
                Notice::Databases => presenter.databases_changed(&self.databases),
                Notice::Description { database, text } => {
                    presenter.description_loaded(&database, &text)
                }
                Notice::Info(message) => presenter.info(&message),
                Notice::Theme(theme) => presenter.theme_changed(theme),
            }
        }
    }

    /// Apply one user action
    pub async fn handle_action(&mut self, action: UserAction) {
        tracing::debug!(?action, "User action");
        match action {
            UserAction::SelectDatabase(database) => self.select_database(&database).await,
            UserAction::SelectChat(chat) => self.select_chat(chat).await,
            UserAction::NewChat => self.start_new_chat(),
            UserAction::Send(text) => self.submit(text).await,
            UserAction::Attach(path) => match self.policy.load(&path) {
                Ok(attachment) => self.stage(attachment),
                Err(e) => self.reconciler.notice(e.to_string()),
            },
            UserAction::AttachBytes(attachment) => self.stage(attachment),
            UserAction::DeleteChat(chat) => self.delete_chat(chat),
            UserAction::StarChat { chat_id, starred } => self.star_chat(chat_id, starred),
            UserAction::RenameChat { chat_id, title } => self.rename_chat(chat_id, &title),
            UserAction::SetRole(role) => self.set_role(role).await,
            UserAction::ClearChat => self.clear_chat().await,
            UserAction::EditDescription(text) => self.edit_description(text),
            UserAction::BlurDescription => {
                if let Some(save) = self.autosave.blur() {
                    self.save_description(save);
                }
            }
            UserAction::ShowDescription => self.show_description(),
            UserAction::RefreshDatabases => self.refresh_databases(),
            UserAction::RefreshChats => self.refresh_chats(),
            UserAction::FetchAttachment { name, output } => self.fetch_attachment(name, output),
            UserAction::SetTheme(theme) => self.set_theme(theme),
            UserAction::ShowStatus => self.show_status(),
            UserAction::Quit => {}
        }
    }

    /// Apply one transport event
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if self.session.set_connection(ConnectionStatus::Connected) {
                    self.notices.push(Notice::Connection(ConnectionStatus::Connected));
                }
                for event in self.session.announcements() {
                    self.announce(event).await;
                }
            }
            TransportEvent::Disconnected => {
                if self.session.set_connection(ConnectionStatus::Disconnected) {
                    self.notices
                        .push(Notice::Connection(ConnectionStatus::Disconnected));
                }
                self.pending_create = None;
                if self.reconciler.state().is_busy() {
                    self.reconciler
                        .fail("Connection lost before the reply finished");
                }
            }
            TransportEvent::Event(event) => self.handle_server_event(event).await,
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        let created = match &event {
            ServerEvent::ChatCreated { chat } => {
                let issued_for = self.pending_create.take();
                if issued_for.is_none() || issued_for.as_deref() != self.session.database() {
                    tracing::debug!(
                        chat_id = chat.id,
                        database = ?issued_for,
                        "Dropping chat_created for another database"
                    );
                    return;
                }
                Some(chat.clone())
            }
            _ => None,
        };

        let dispatch = self.reconciler.apply(event);

        if let Some(chat) = created {
            self.chats.insert_created(chat.clone());
            self.notices.push(Notice::Chats);
            if self.reconciler.active_chat() == Some(chat.id) {
                self.session.adopt_created_chat(chat.id);
                self.remember_context();
            }
        }

        if let Some(dispatch) = dispatch {
            self.dispatch(dispatch).await;
        }
    }

    /// Apply the result of a spawned directory call
    pub async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Databases(Ok(databases)) => {
                self.databases = databases;
                self.notices.push(Notice::Databases);
            }
            Completion::Databases(Err(e)) => {
                self.reconciler
                    .fail(format!("Could not load databases: {}", e));
            }
            Completion::Chats { database, result } => {
                if self.session.database() != Some(database.as_str()) {
                    tracing::debug!(database = %database, "Dropping stale chat list");
                    return;
                }
                match result {
                    Ok(chats) => {
                        self.chats.replace(&database, chats);
                        self.notices.push(Notice::Chats);
                    }
                    Err(e) => self.reconciler.fail(format!("Could not load chats: {}", e)),
                }
            }
            Completion::Description { database, result } => {
                if self.session.database() != Some(database.as_str()) {
                    tracing::debug!(database = %database, "Dropping stale description");
                    return;
                }
                match result {
                    Ok(text) => {
                        self.description = Some(text.clone());
                        self.notices.push(Notice::Description { database, text });
                    }
                    Err(e) => self
                        .reconciler
                        .fail(format!("Could not load description: {}", e)),
                }
            }
            Completion::DescriptionSaved {
                database,
                description,
                result,
            } => match result {
                Ok(()) => {
                    if let Some(info) = self.databases.iter_mut().find(|d| d.name == database) {
                        info.description = description.clone();
                    }
                    if self.session.database() == Some(database.as_str()) {
                        self.description = Some(description);
                    }
                }
                Err(e) => self
                    .reconciler
                    .fail(format!("Could not save description of {}: {}", database, e)),
            },
            Completion::Uploaded { epoch, result } => {
                if let Some(event) = self.reconciler.uploads_finished(epoch, result) {
                    self.send_turn_event(event).await;
                }
            }
            Completion::ChatUpdated { database, result } => {
                if let Err(e) = result {
                    self.reconciler.fail(e);
                    if self.session.database() == Some(database.as_str()) {
                        self.refresh_chats();
                    }
                }
            }
            Completion::Fetched {
                name,
                output,
                result,
            } => match result {
                Ok(size) => self.notices.push(Notice::Info(format!(
                    "Saved {} ({} bytes) to {}",
                    name,
                    size,
                    output.display()
                ))),
                Err(e) => self
                    .reconciler
                    .fail(format!("Could not fetch {}: {}", name, e)),
            },
        }
    }

    /// Make `database` active
    pub async fn select_database(&mut self, database: &str) {
        let events = self.enter_database(database);
        for event in events {
            self.announce(event).await;
        }
    }

    /// Open `chat` in the active database
    pub async fn select_chat(&mut self, chat: ChatId) {
        if self.session.database().is_none() {
            self.reconciler.notice("Select a database first");
            return;
        }
        if !self.transport.status().is_connected() {
            self.transport.reconnect();
        }
        let events = self.enter_chat(chat);
        for event in events {
            self.announce(event).await;
        }
    }

    /// Switch to a chat that does not exist yet
    pub fn start_new_chat(&mut self) {
        self.session.start_new_chat();
        self.reconciler.interrupt(None);
        self.remember_context();
    }

    fn enter_database(&mut self, database: &str) -> Vec<ClientEvent> {
        if let Some(save) = self.autosave.flush() {
            self.save_description(save);
        }
        let events = self.session.select_database(database);
        self.reconciler.interrupt(None);
        self.chats.reset(Some(database.to_string()));
        self.description = None;
        self.remember_context();
        self.refresh_chats();
        self.load_description();
        events
    }

    fn enter_chat(&mut self, chat: ChatId) -> Vec<ClientEvent> {
        match self.session.select_chat(chat) {
            Ok(events) => {
                self.reconciler.interrupt(Some(chat));
                self.remember_context();
                events
            }
            Err(e) => {
                self.reconciler.notice(e.to_string());
                Vec::new()
            }
        }
    }

    async fn submit(&mut self, text: String) {
        if self.session.database().is_none() {
            self.reconciler.notice("Select a database first");
            return;
        }
        if !self.transport.status().is_connected() {
            self.reconciler.notice(DbaChatError::NotConnected.to_string());
            self.transport.reconnect();
            return;
        }

        let pending = PendingSend::new(text, attachments::dedup(self.staged.clone()));
        match self.reconciler.submit(pending) {
            Ok(submission) => {
                self.staged.clear();
                match submission {
                    Submission::CreateChat { title } => {
                        let event = ClientEvent::CreateChat { title };
                        match self.transport.send(&event).await {
                            Ok(()) => {
                                self.pending_create = self.session.database().map(str::to_string)
                            }
                            Err(e) => self.send_failed(e),
                        }
                    }
                    Submission::Dispatch(dispatch) => self.dispatch(dispatch).await,
                }
            }
            Err(e) => self.reconciler.notice(e.to_string()),
        }
    }

    async fn dispatch(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Send(event) => self.send_turn_event(event).await,
            Dispatch::Upload {
                chat_id,
                attachments,
                epoch,
            } => {
                let Some(database) = self.session.database().map(str::to_string) else {
                    self.reconciler.fail("Select a database first");
                    return;
                };
                let directory = Arc::clone(&self.directory);
                let tx = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = directory
                        .upload_files(&database, chat_id, &attachments)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = tx.send(Completion::Uploaded { epoch, result });
                });
            }
        }
    }

    async fn send_turn_event(&mut self, event: ClientEvent) {
        if let Err(e) = self.transport.send(&event).await {
            self.send_failed(e);
        }
    }

    fn send_failed(&mut self, error: anyhow::Error) {
        tracing::warn!("Send failed: {}", error);
        self.reconciler.fail(error.to_string());
        if matches!(
            error.downcast_ref::<DbaChatError>(),
            Some(DbaChatError::NotConnected)
        ) {
            self.transport.reconnect();
        }
    }

    /// Send a context announcement; a failure is repaired by the next reconnect
    async fn announce(&mut self, event: ClientEvent) {
        if let Err(e) = self.transport.send(&event).await {
            tracing::warn!(kind = event.kind(), "Announcement not sent: {}", e);
            self.transport.reconnect();
        }
    }

    fn stage(&mut self, attachment: Attachment) {
        let name = attachment.name.clone();
        match self.policy.stage(&mut self.staged, attachment) {
            Ok(true) => self.notices.push(Notice::Info(format!("Attached {}", name))),
            Ok(false) => self
                .notices
                .push(Notice::Info(format!("{} is already attached", name))),
            Err(e) => self.reconciler.notice(e.to_string()),
        }
    }

    fn delete_chat(&mut self, chat: Option<ChatId>) {
        let Some(database) = self.active_database() else {
            return;
        };
        let Some(chat) = self.target_chat(chat) else {
            return;
        };
        if self.chats.remove(chat).is_some() {
            self.notices.push(Notice::Chats);
        }
        if self.session.chat() == Some(chat) {
            self.start_new_chat();
        }
        if self.prefs.last_chat(&database) == Some(chat) {
            self.persist(|p| p.remember_chat(&database, None));
        }
        self.spawn_chat_update(database, move |directory, database| async move {
            directory.delete_chat(&database, chat).await
        });
    }

    fn star_chat(&mut self, chat: Option<ChatId>, starred: bool) {
        let Some(database) = self.active_database() else {
            return;
        };
        let Some(chat) = self.target_chat(chat) else {
            return;
        };
        if self.chats.set_starred(chat, starred) {
            self.notices.push(Notice::Chats);
        }
        self.spawn_chat_update(database, move |directory, database| async move {
            directory.star_chat(&database, chat, starred).await
        });
    }

    fn rename_chat(&mut self, chat: Option<ChatId>, title: &str) {
        let title = title.trim().to_string();
        if title.is_empty() {
            self.reconciler.notice("Chat title cannot be empty");
            return;
        }
        let Some(database) = self.active_database() else {
            return;
        };
        let Some(chat) = self.target_chat(chat) else {
            return;
        };
        if self.chats.rename(chat, &title) {
            self.notices.push(Notice::Chats);
        }
        self.spawn_chat_update(database, move |directory, database| async move {
            directory.rename_chat(&database, chat, &title).await
        });
    }

    fn spawn_chat_update<F, Fut>(&self, database: String, call: F)
    where
        F: FnOnce(Arc<dyn Directory>, String) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let directory = Arc::clone(&self.directory);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = call(directory, database.clone())
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(Completion::ChatUpdated { database, result });
        });
    }

    async fn set_role(&mut self, role: Role) {
        let events = self.session.set_role(role);
        self.persist(|p| p.role = Some(role));
        self.notices.push(Notice::Info(format!("Role set to {}", role)));
        for event in events {
            self.announce(event).await;
        }
    }

    async fn clear_chat(&mut self) {
        if self.session.chat().is_none() {
            self.reconciler.notice("Open a chat first");
            return;
        }
        if let Err(e) = self.transport.send(&ClientEvent::ClearChat).await {
            self.reconciler.notice(e.to_string());
            self.transport.reconnect();
        }
    }

    fn edit_description(&mut self, text: String) {
        let Some(database) = self.active_database() else {
            return;
        };
        if let Some(save) = self.autosave.edit(&database, text, Instant::now()) {
            self.save_description(save);
        }
    }

    /// Save the pending description edit if its quiet period has elapsed
    pub fn save_description_if_due(&mut self, now: Instant) {
        if let Some(save) = self.autosave.poll_due(now) {
            self.save_description(save);
        }
    }

    fn save_description(&self, save: DescriptionSave) {
        tracing::debug!(database = %save.database, "Saving description");
        let directory = Arc::clone(&self.directory);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = directory
                .put_description(&save.database, &save.text)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(Completion::DescriptionSaved {
                database: save.database,
                description: save.text,
                result,
            });
        });
    }

    fn show_description(&mut self) {
        let Some(database) = self.active_database() else {
            return;
        };
        match &self.description {
            Some(text) if !text.is_empty() => self.notices.push(Notice::Description {
                database,
                text: text.clone(),
            }),
            _ => self
                .notices
                .push(Notice::Info(format!("{} has no description", database))),
        }
    }

    fn refresh_databases(&self) {
        let directory = Arc::clone(&self.directory);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = directory.list_databases().await.map_err(|e| e.to_string());
            let _ = tx.send(Completion::Databases(result));
        });
    }

    fn refresh_chats(&self) {
        let Some(database) = self.session.database().map(str::to_string) else {
            return;
        };
        let directory = Arc::clone(&self.directory);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = directory
                .list_chats(&database)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(Completion::Chats { database, result });
        });
    }

    fn load_description(&self) {
        let Some(database) = self.session.database().map(str::to_string) else {
            return;
        };
        let directory = Arc::clone(&self.directory);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = directory
                .get_description(&database)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(Completion::Description { database, result });
        });
    }

    fn fetch_attachment(&mut self, name: String, output: PathBuf) {
        let (Some(database), Some(chat)) = (self.active_database(), self.session.chat()) else {
            if self.session.database().is_some() {
                self.reconciler.notice("Open a chat first");
            }
            return;
        };
        let directory = Arc::clone(&self.directory);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = match directory.fetch_file(&database, chat, &name).await {
                Ok(bytes) => tokio::fs::write(&output, &bytes)
                    .await
                    .map(|()| bytes.len())
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let _ = tx.send(Completion::Fetched {
                name,
                output,
                result,
            });
        });
    }

    fn set_theme(&mut self, theme: Option<Theme>) {
        let theme = theme.unwrap_or_else(|| self.prefs.theme.toggled());
        self.persist(|p| p.theme = theme);
        self.notices.push(Notice::Theme(theme));
        self.notices.push(Notice::Info(format!("Theme: {}", theme)));
    }

    fn show_status(&mut self) {
        let status = format!(
            "{} | database: {} | chat: {} | role: {} | turn: {:?}",
            self.session.connection(),
            self.session.database().unwrap_or("-"),
            self.session
                .chat()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "new".to_string()),
            self.session.role(),
            self.reconciler.state(),
        );
        self.notices.push(Notice::Info(status));
    }

    /// Active database, or a visible error when there is none
    fn active_database(&mut self) -> Option<String> {
        let database = self.session.database().map(str::to_string);
        if database.is_none() {
            self.reconciler.notice("Select a database first");
        }
        database
    }

    /// `chat`, or the active chat, or a visible error when there is none
    fn target_chat(&mut self, chat: Option<ChatId>) -> Option<ChatId> {
        let chat = chat.or(self.session.chat());
        if chat.is_none() {
            self.reconciler.notice("Open a chat first");
        }
        chat
    }

    fn remember_context(&mut self) {
        let database = self.session.database().map(str::to_string);
        let chat = self.session.chat();
        self.persist(|p| {
            if let Some(database) = &database {
                p.remember_chat(database, chat);
            }
            p.last_database = database;
        });
    }

    fn persist(&mut self, change: impl FnOnce(&mut Preferences)) {
        change(&mut self.prefs);
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.prefs) {
                tracing::warn!("Failed to save client state: {}", e);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
