//! Stream reconciler
//!
//! Consumes inbound server events and the user's send intent, and keeps
//! one conversation view consistent across reconnects and context
//! switches. Each turn (one user submission through to its stream end or
//! error) moves through an explicit [`TurnState`]:
//!
//! ```text
//! Idle --submit, no chat--> AwaitingChatCreation --chat_created--+
//!  |                                                              |
//!  +--submit, chat active------------------------+----------------+
//!                                                |
//!                    attachments? --> Uploading --uploads ok--+
//!                                                |            |
//!                                                v            v
//!                                  Streaming <--> ToolRunning
//!                                                |
//!                       stream_end / error ------+--> Idle
//! ```
//!
//! A context switch ([`Reconciler::interrupt`]) drops every in-flight
//! piece of visual state synchronously. Every turn that ends, fails or is
//! abandoned bumps the turn epoch, so late upload results for it are
//! ignored instead of releasing the next turn's message.
//! Server events tagged with a chat other than the active one are dropped.

use crate::attachments::Attachment;
use crate::error::{DbaChatError, Result};
use crate::presentation::MarkdownRenderer;
use crate::protocol::{ChatId, ChatSummary, ClientEvent, HistoryMessage, ServerEvent, DEFAULT_CHAT_TITLE};
use std::sync::Arc;

/// Content captured at send time
///
/// When no chat exists yet it is held until the server confirms creation;
/// it is consumed exactly once, or discarded on error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PendingSend {
    /// Message text
    pub text: String,
    /// Files to upload before the message is sent
    pub attachments: Vec<Attachment>,
}

impl PendingSend {
    /// Build a pending send from trimmed text and attachments
    pub fn new(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            attachments,
        }
    }

    /// True when there is neither text nor an attachment
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.attachments.is_empty()
    }

    /// Names of the attached files, in attach order
    pub fn attachment_names(&self) -> Vec<String> {
        self.attachments.iter().map(|a| a.name.clone()).collect()
    }

    /// Title for a chat created by this message
    ///
    /// Whitespace is collapsed and the result is cut to `max_chars`
    /// characters with an ellipsis. Falls back to the first attachment
    /// name, then to the default title.
    ///
    /// # Examples
    ///
    /// ```
    /// use dbachat::reconciler::PendingSend;
    ///
    /// let pending = PendingSend::new("show me   slow queries", vec![]);
    /// assert_eq!(pending.derive_title(60), "show me slow queries");
    /// ```
    pub fn derive_title(&self, max_chars: usize) -> String {
        let collapsed = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            if collapsed.chars().count() <= max_chars {
                return collapsed;
            }
            let cut: String = collapsed.chars().take(max_chars.saturating_sub(1)).collect();
            return format!("{}…", cut.trim_end());
        }
        self.attachments
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string())
    }
}

/// Where the current turn stands
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    /// No turn in flight; input enabled
    #[default]
    Idle,
    /// Content is held until the server confirms the new chat
    AwaitingChatCreation(PendingSend),
    /// Attachments are being uploaded; the message text waits here
    Uploading { text: String },
    /// The message was sent; text fragments are arriving
    Streaming,
    /// A tool call was announced and more server work may follow
    ToolRunning,
}

impl TurnState {
    /// True while the server is producing output for the turn
    pub fn is_receiving(&self) -> bool {
        matches!(self, Self::Streaming | Self::ToolRunning)
    }

    /// True while any turn is in flight
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// The in-progress assistant reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamState {
    /// Every fragment received so far, concatenated
    pub accumulated: String,
    /// True between the first fragment and the end of the turn
    pub active: bool,
}

impl StreamState {
    fn reset(&mut self) {
        self.accumulated.clear();
        self.active = false;
    }
}

/// Visual state of a tool badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// Spinner
    Running,
    /// Checkmark
    Done,
}

/// One tool invocation announced during the current turn
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    /// Tool name
    pub name: String,
    /// Arguments as sent by the server
    pub arguments: serde_json::Value,
    /// Badge state
    pub status: ToolStatus,
}

/// A transcript entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Message typed by the user
    User {
        text: String,
        attachments: Vec<String>,
    },
    /// Assistant reply: raw markdown and its rendering
    Assistant { source: String, rendered: String },
    /// Informational notice from the server
    System(String),
    /// Visible error
    Error(String),
}

/// Everything the presenter needs to draw the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    /// Transcript in display order
    pub entries: Vec<Entry>,
    /// Tool badges of the current (or last finished) turn, in arrival order
    pub tool_calls: Vec<ToolCallRecord>,
    /// Whether the "thinking" indicator is shown
    pub thinking: bool,
    /// Whether the input box accepts submissions
    pub input_enabled: bool,
}

impl Default for ConversationView {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            tool_calls: Vec::new(),
            thinking: false,
            input_enabled: true,
        }
    }
}

impl ConversationView {
    /// Number of badges still spinning
    pub fn running_tool_calls(&self) -> usize {
        self.tool_calls
            .iter()
            .filter(|t| t.status == ToolStatus::Running)
            .count()
    }

    /// Last entry, if any
    pub fn last_entry(&self) -> Option<&Entry> {
        self.entries.last()
    }
}

/// Incremental change notifications for the presenter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    /// Transcript emptied
    Cleared,
    /// The whole transcript was rebuilt (history load)
    TranscriptReplaced,
    /// A new entry at this index
    EntryAppended(usize),
    /// The assistant entry at this index was re-rendered from the full buffer
    AssistantRendered(usize),
    /// A new badge at this index
    ToolCallAdded(usize),
    /// All badges flipped to done
    ToolCallsDone,
    /// All badges discarded
    ToolCallsRemoved,
    /// Thinking indicator shown or hidden
    Thinking(bool),
    /// Input enabled or disabled
    InputEnabled(bool),
    /// Viewport should follow the newest output
    ScrollToBottom,
}

/// Next step the controller must perform for a submission
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Ask the server to create a chat; content is held meanwhile
    CreateChat { title: String },
    /// The chat exists; continue with the dispatch
    Dispatch(Dispatch),
}

/// Delivery of a message into an existing chat
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Upload these files first, then report back with the epoch
    Upload {
        chat_id: ChatId,
        attachments: Vec<Attachment>,
        epoch: u64,
    },
    /// Send this event now
    Send(ClientEvent),
}

/// Turn state machine and conversation view for the active chat
pub struct Reconciler {
    state: TurnState,
    stream: StreamState,
    view: ConversationView,
    renderer: Arc<dyn MarkdownRenderer>,
    active_chat: Option<ChatId>,
    /// Index of the first transcript entry that belongs to the turn in flight
    turn_start: Option<usize>,
    /// Index of the assistant entry being streamed into
    stream_entry: Option<usize>,
    epoch: u64,
    distance_from_bottom: u32,
    autoscroll_threshold: u32,
    max_title_length: usize,
    updates: Vec<ViewUpdate>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("state", &self.state)
            .field("active_chat", &self.active_chat)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create an idle reconciler
    ///
    /// # Arguments
    ///
    /// * `renderer` - Markdown renderer applied to the whole reply buffer
    /// * `autoscroll_threshold` - Follow new output only when the viewport
    ///   is at most this far from the bottom
    /// * `max_title_length` - Limit for titles derived from the first message
    pub fn new(
        renderer: Arc<dyn MarkdownRenderer>,
        autoscroll_threshold: u32,
        max_title_length: usize,
    ) -> Self {
        Self {
            state: TurnState::Idle,
            stream: StreamState::default(),
            view: ConversationView::default(),
            renderer,
            active_chat: None,
            turn_start: None,
            stream_entry: None,
            epoch: 0,
            distance_from_bottom: 0,
            autoscroll_threshold,
            max_title_length,
            updates: Vec::new(),
        }
    }

    /// Current turn state
    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Current reply buffer
    pub fn stream(&self) -> &StreamState {
        &self.stream
    }

    /// Current view
    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    /// Chat whose events are accepted
    pub fn active_chat(&self) -> Option<ChatId> {
        self.active_chat
    }

    /// Turn generation, bumped whenever a turn returns to Idle
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Drain pending view updates
    pub fn take_updates(&mut self) -> Vec<ViewUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// Record how far the viewport currently is from the bottom
    pub fn set_distance_from_bottom(&mut self, distance: u32) {
        self.distance_from_bottom = distance;
    }

    /// Start a turn from user content
    ///
    /// The user entry is appended immediately and input is disabled. With
    /// no active chat the content is held and a chat creation is requested.
    ///
    /// # Errors
    ///
    /// Returns [`DbaChatError::Validation`] if a turn is already in flight
    /// or the content is empty. Nothing changes in that case.
    pub fn submit(&mut self, pending: PendingSend) -> Result<Submission> {
        if self.state.is_busy() {
            return Err(DbaChatError::Validation(
                "Wait for the current reply to finish".to_string(),
            )
            .into());
        }
        if pending.is_empty() {
            return Err(
                DbaChatError::Validation("Type a message or attach a file".to_string()).into(),
            );
        }

        if !self.view.tool_calls.is_empty() {
            self.view.tool_calls.clear();
            self.updates.push(ViewUpdate::ToolCallsRemoved);
        }
        self.turn_start = Some(self.view.entries.len());
        self.push_entry(Entry::User {
            text: pending.text.clone(),
            attachments: pending.attachment_names(),
        });
        self.set_input_enabled(false);

        match self.active_chat {
            None => {
                let title = pending.derive_title(self.max_title_length);
                tracing::debug!(title = %title, "Holding message until chat is created");
                self.state = TurnState::AwaitingChatCreation(pending);
                Ok(Submission::CreateChat { title })
            }
            Some(chat_id) => Ok(Submission::Dispatch(self.begin_dispatch(chat_id, pending))),
        }
    }

    /// The server confirmed a chat creation
    ///
    /// Consumes the held content and returns how to deliver it. Returns
    /// `None` when nothing was waiting for a chat (for example after the
    /// user switched context in the meantime).
    pub fn chat_created(&mut self, chat: &ChatSummary) -> Option<Dispatch> {
        match std::mem::take(&mut self.state) {
            TurnState::AwaitingChatCreation(pending) => {
                tracing::debug!(chat_id = chat.id, "Chat created; releasing held message");
                self.active_chat = Some(chat.id);
                Some(self.begin_dispatch(chat.id, pending))
            }
            other => {
                tracing::warn!(
                    chat_id = chat.id,
                    state = ?other,
                    "Ignoring chat_created with no held message"
                );
                self.state = other;
                None
            }
        }
    }

    /// Attachment uploads for the turn started at `epoch` finished
    ///
    /// On success returns the message event to send. On failure the held
    /// text is discarded, an error entry is shown and input is re-enabled.
    /// Results for an abandoned context are ignored.
    pub fn uploads_finished(
        &mut self,
        epoch: u64,
        result: std::result::Result<Vec<String>, String>,
    ) -> Option<ClientEvent> {
        if epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, "Dropping stale upload result");
            return None;
        }
        let text = match std::mem::take(&mut self.state) {
            TurnState::Uploading { text } => text,
            other => {
                tracing::warn!(state = ?other, "Upload finished outside of an upload");
                self.state = other;
                return None;
            }
        };

        match result {
            Ok(names) => {
                self.start_receiving();
                Some(ClientEvent::Message {
                    content: text,
                    attachments: names,
                })
            }
            Err(message) => {
                self.fail(format!("Upload failed: {}", message));
                None
            }
        }
    }

    /// Apply one inbound server event
    ///
    /// Returns a dispatch when the event released a held message
    /// (`chat_created`).
    pub fn apply(&mut self, event: ServerEvent) -> Option<Dispatch> {
        if let ServerEvent::ChatCreated { chat } = &event {
            return self.chat_created(chat);
        }

        if let Some(tag) = event.chat_id() {
            if Some(tag) != self.active_chat {
                tracing::warn!(
                    kind = event.kind(),
                    chat_id = tag,
                    active = ?self.active_chat,
                    "Dropping event for inactive chat"
                );
                return None;
            }
        }

        match event {
            ServerEvent::Stream { content, .. } => self.on_fragment(&content),
            ServerEvent::ToolCall { tool, args, .. } => self.on_tool_call(tool, args),
            ServerEvent::StreamEnd { .. } => self.on_stream_end(),
            ServerEvent::Error { content, .. } => self.fail(content),
            ServerEvent::System { content, .. } => self.push_entry(Entry::System(content)),
            ServerEvent::HistoryLoaded { messages, .. } => self.on_history(messages),
            ServerEvent::ChatCleared { .. } => {
                self.reset_turn();
                self.clear_entries();
            }
            ServerEvent::ChatCreated { .. } => {}
        }
        None
    }

    /// Drop all in-flight state and switch the accepted chat
    ///
    /// Used for every context switch: the transcript, reply buffer, badges,
    /// thinking indicator and any held message are discarded at once.
    pub fn interrupt(&mut self, chat: Option<ChatId>) {
        if self.state.is_busy() {
            tracing::info!(state = ?self.state, "Abandoning turn on context switch");
        }
        self.active_chat = chat;
        self.reset_turn();
        self.clear_entries();
    }

    /// Show an error that also ends any turn in flight
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(error = %message, "Turn failed");
        if !self.view.tool_calls.is_empty() {
            self.view.tool_calls.clear();
            self.updates.push(ViewUpdate::ToolCallsRemoved);
        }
        self.reset_turn();
        self.push_entry(Entry::Error(message));
    }

    /// Show an error without touching the turn (client-side validation)
    pub fn notice(&mut self, message: impl Into<String>) {
        self.push_entry(Entry::Error(message.into()));
    }

    fn begin_dispatch(&mut self, chat_id: ChatId, pending: PendingSend) -> Dispatch {
        if pending.attachments.is_empty() {
            self.start_receiving();
            Dispatch::Send(ClientEvent::Message {
                content: pending.text,
                attachments: Vec::new(),
            })
        } else {
            self.state = TurnState::Uploading { text: pending.text };
            Dispatch::Upload {
                chat_id,
                attachments: pending.attachments,
                epoch: self.epoch,
            }
        }
    }

    fn start_receiving(&mut self) {
        self.state = TurnState::Streaming;
        self.stream.reset();
        self.stream_entry = None;
        self.set_thinking(true);
    }

    fn on_fragment(&mut self, content: &str) {
        if !self.state.is_receiving() {
            tracing::debug!(state = ?self.state, "Dropping fragment outside of a turn");
            return;
        }
        let follow = self.distance_from_bottom <= self.autoscroll_threshold;

        self.set_thinking(false);
        self.stream.active = true;
        self.stream.accumulated.push_str(content);
        let rendered = self.renderer.render(&self.stream.accumulated);
        let entry = Entry::Assistant {
            source: self.stream.accumulated.clone(),
            rendered,
        };
        match self.stream_entry {
            Some(index) => {
                self.view.entries[index] = entry;
                self.updates.push(ViewUpdate::AssistantRendered(index));
            }
            None => {
                self.stream_entry = Some(self.view.entries.len());
                self.push_entry(entry);
            }
        }
        self.state = TurnState::Streaming;

        if follow {
            self.updates.push(ViewUpdate::ScrollToBottom);
        }
    }

    fn on_tool_call(&mut self, name: String, arguments: serde_json::Value) {
        if !self.state.is_receiving() {
            tracing::debug!(tool = %name, state = ?self.state, "Dropping tool call outside of a turn");
            return;
        }
        self.set_thinking(false);
        self.view.tool_calls.push(ToolCallRecord {
            name,
            arguments,
            status: ToolStatus::Running,
        });
        self.updates
            .push(ViewUpdate::ToolCallAdded(self.view.tool_calls.len() - 1));
        self.set_thinking(true);
        self.state = TurnState::ToolRunning;
    }

    fn on_stream_end(&mut self) {
        if !self.state.is_receiving() {
            tracing::debug!(state = ?self.state, "Dropping stream_end outside of a turn");
            return;
        }
        for call in &mut self.view.tool_calls {
            call.status = ToolStatus::Done;
        }
        if !self.view.tool_calls.is_empty() {
            self.updates.push(ViewUpdate::ToolCallsDone);
        }
        self.reset_turn();
    }

    fn on_history(&mut self, messages: Vec<HistoryMessage>) {
        let live = match self.turn_start {
            Some(start) if start <= self.view.entries.len() => self.view.entries.split_off(start),
            _ => Vec::new(),
        };
        let old_start = self.turn_start.unwrap_or(0);

        self.view.entries = messages
            .into_iter()
            .map(|m| match m.role.as_str() {
                "user" => Entry::User {
                    text: m.content,
                    attachments: Vec::new(),
                },
                "assistant" => Entry::Assistant {
                    rendered: self.renderer.render(&m.content),
                    source: m.content,
                },
                _ => Entry::System(m.content),
            })
            .collect();

        if self.turn_start.is_some() {
            let new_start = self.view.entries.len();
            self.turn_start = Some(new_start);
            self.stream_entry = self.stream_entry.map(|i| i - old_start + new_start);
        }
        self.view.entries.extend(live);
        self.updates.push(ViewUpdate::TranscriptReplaced);
        self.updates.push(ViewUpdate::ScrollToBottom);
    }

    /// Back to Idle: buffer, indicator and held content cleared; badges kept
    fn reset_turn(&mut self) {
        self.epoch += 1;
        self.state = TurnState::Idle;
        self.stream.reset();
        self.stream_entry = None;
        self.turn_start = None;
        self.set_thinking(false);
        self.set_input_enabled(true);
    }

    fn clear_entries(&mut self) {
        self.view.entries.clear();
        if !self.view.tool_calls.is_empty() {
            self.view.tool_calls.clear();
            self.updates.push(ViewUpdate::ToolCallsRemoved);
        }
        self.updates.push(ViewUpdate::Cleared);
    }

    fn push_entry(&mut self, entry: Entry) {
        self.view.entries.push(entry);
        self.updates
            .push(ViewUpdate::EntryAppended(self.view.entries.len() - 1));
    }

    fn set_thinking(&mut self, on: bool) {
        if self.view.thinking != on {
            self.view.thinking = on;
            self.updates.push(ViewUpdate::Thinking(on));
        }
    }

    fn set_input_enabled(&mut self, on: bool) {
        if self.view.input_enabled != on {
            self.view.input_enabled = on;
            self.updates.push(ViewUpdate::InputEnabled(on));
        }
    }
}
