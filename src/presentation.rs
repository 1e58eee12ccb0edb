//! Presentation: turning reconciler output into terminal output
//!
//! The reconciler never draws anything. It exposes a
//! [`ConversationView`](crate::reconciler::ConversationView) and a queue of
//! [`ViewUpdate`]s; a [`Presenter`] consumes both. Markdown rendering is an
//! external collaborator behind [`MarkdownRenderer`].

use crate::protocol::{ChatSummary, DatabaseInfo};
use crate::reconciler::{ConversationView, Entry, ToolCallRecord, ToolStatus, ViewUpdate};
use crate::session::ConnectionStatus;
use colored::{Color, Colorize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// Renders a complete markdown document
///
/// Always called with the whole reply so far, never with a delta, because
/// later text can change the structure of earlier text (an unclosed code
/// fence, for instance).
pub trait MarkdownRenderer: Send + Sync {
    /// Render `source` for display
    fn render(&self, source: &str) -> String;
}

/// Renderer that displays markdown source as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl MarkdownRenderer for PlainRenderer {
    fn render(&self, source: &str) -> String {
        source.to_string()
    }
}

/// Colour theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Bright colours for dark terminals
    #[default]
    Dark,
    /// Muted colours for light terminals
    Light,
}

impl Theme {
    /// Parse a theme name
    pub fn parse_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            other => Err(format!("Unknown theme: {}", other)),
        }
    }

    /// The other theme
    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    fn palette(self) -> Palette {
        match self {
            Self::Dark => Palette {
                user: Color::BrightCyan,
                assistant: Color::BrightWhite,
                system: Color::BrightBlack,
                error: Color::BrightRed,
                tool: Color::BrightYellow,
                done: Color::BrightGreen,
            },
            Self::Light => Palette {
                user: Color::Blue,
                assistant: Color::Black,
                system: Color::BrightBlack,
                error: Color::Red,
                tool: Color::Magenta,
                done: Color::Green,
            },
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dark => write!(f, "dark"),
            Self::Light => write!(f, "light"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Palette {
    user: Color,
    assistant: Color,
    system: Color,
    error: Color,
    tool: Color,
    done: Color,
}

/// Consumer of view state
pub trait Presenter: Send {
    /// Apply one update; `view` is the state after the update
    fn present(&mut self, update: &ViewUpdate, view: &ConversationView);

    /// Connection status changed
    fn connection_changed(&mut self, status: ConnectionStatus);

    /// Cached chat list changed
    fn chats_changed(&mut self, database: &str, chats: &[ChatSummary]);

    /// Database list (re)loaded
    fn databases_changed(&mut self, databases: &[DatabaseInfo]);

    /// Description of the active database loaded from the server
    fn description_loaded(&mut self, database: &str, description: &str);

    /// Informational line that is not part of the conversation
    fn info(&mut self, message: &str);

    /// Colour theme changed
    fn theme_changed(&mut self, _theme: Theme) {}

    /// Distance between the viewport and the bottom of the transcript
    fn distance_from_bottom(&self) -> u32 {
        0
    }
}

/// Append-only terminal presenter
///
/// A terminal cannot redraw earlier lines, so streamed replies are written
/// as the growing suffix of the latest rendering. When a re-render changes
/// text that was already printed, the whole reply is printed again. The
/// thinking indicator is the one exception: it stays on an unterminated
/// line and is erased when it goes away.
pub struct TerminalPresenter<W: Write + Send> {
    out: W,
    palette: Palette,
    printed: String,
    /// The cursor sits at the end of the thinking indicator
    thinking_line: bool,
}

impl TerminalPresenter<std::io::Stdout> {
    /// Presenter writing to stdout
    pub fn stdout(theme: Theme) -> Self {
        Self::new(std::io::stdout(), theme)
    }
}

impl<W: Write + Send> TerminalPresenter<W> {
    /// Presenter writing to `out`
    pub fn new(out: W, theme: Theme) -> Self {
        Self {
            out,
            palette: theme.palette(),
            printed: String::new(),
            thinking_line: false,
        }
    }

    /// Switch colours
    pub fn set_theme(&mut self, theme: Theme) {
        self.palette = theme.palette();
    }

    /// Consume the presenter and return the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: String) {
        self.end_thinking_line();
        let _ = writeln!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    fn print_entry(&mut self, entry: &Entry) {
        let p = self.palette;
        match entry {
            Entry::User { text, attachments } => {
                let mut line = format!("{} {}", "you>".color(p.user).bold(), text);
                if !attachments.is_empty() {
                    line.push_str(&format!(" {}", format!("[{}]", attachments.join(", ")).dimmed()));
                }
                self.line(line);
            }
            Entry::Assistant { rendered, .. } => {
                self.line(format!("{}", "assistant>".color(p.assistant).bold()));
                self.printed.clear();
                self.print_reply(rendered);
            }
            Entry::System(text) => self.line(format!("{}", text.color(p.system).italic())),
            Entry::Error(text) => self.line(format!("{} {}", "error:".color(p.error).bold(), text)),
        }
    }

    fn print_reply(&mut self, rendered: &str) {
        self.end_thinking_line();
        if let Some(suffix) = rendered.strip_prefix(self.printed.as_str()) {
            let _ = write!(self.out, "{}", suffix);
        } else {
            let _ = write!(self.out, "\n{}", rendered);
        }
        let _ = self.out.flush();
        self.printed = rendered.to_string();
    }

    /// Keep a stale indicator on its own line when other output comes first
    fn end_thinking_line(&mut self) {
        if self.thinking_line {
            let _ = writeln!(self.out);
            self.thinking_line = false;
        }
    }

    fn print_tool(&mut self, record: &ToolCallRecord) {
        let p = self.palette;
        let marker = match record.status {
            ToolStatus::Running => "⟳".color(p.tool),
            ToolStatus::Done => "✓".color(p.done),
        };
        self.line(format!(
            "\n  {} {} {}",
            marker,
            record.name.color(p.tool),
            record.arguments.to_string().dimmed()
        ));
    }
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn present(&mut self, update: &ViewUpdate, view: &ConversationView) {
        match update {
            ViewUpdate::Cleared => {
                self.printed.clear();
                self.line(format!("{}", "── conversation cleared ──".dimmed()));
            }
            ViewUpdate::TranscriptReplaced => {
                self.printed.clear();
                let entries = view.entries.clone();
                for entry in &entries {
                    self.print_entry(entry);
                    if matches!(entry, Entry::Assistant { .. }) {
                        self.line(String::new());
                    }
                }
            }
            ViewUpdate::EntryAppended(index) => {
                if let Some(entry) = view.entries.get(*index).cloned() {
                    self.print_entry(&entry);
                }
            }
            ViewUpdate::AssistantRendered(index) => {
                if let Some(Entry::Assistant { rendered, .. }) = view.entries.get(*index) {
                    let rendered = rendered.clone();
                    self.print_reply(&rendered);
                }
            }
            ViewUpdate::ToolCallAdded(index) => {
                if let Some(record) = view.tool_calls.get(*index).cloned() {
                    self.print_tool(&record);
                }
            }
            ViewUpdate::ToolCallsDone => {
                let p = self.palette;
                let names: Vec<String> = view.tool_calls.iter().map(|t| t.name.clone()).collect();
                self.line(format!("\n  {} {}", "✓".color(p.done), names.join(", ").dimmed()));
            }
            ViewUpdate::ToolCallsRemoved | ViewUpdate::ScrollToBottom => {}
            ViewUpdate::Thinking(true) => {
                self.end_thinking_line();
                let _ = write!(self.out, "{}", "  thinking…".dimmed());
                let _ = self.out.flush();
                self.thinking_line = true;
            }
            ViewUpdate::Thinking(false) => {
                if self.thinking_line {
                    // carriage return, then erase the line
                    let _ = write!(self.out, "\r\x1b[2K");
                    let _ = self.out.flush();
                    self.thinking_line = false;
                }
            }
            ViewUpdate::InputEnabled(on) => {
                if *on {
                    self.printed.clear();
                    self.line(String::new());
                }
            }
        }
    }

    fn connection_changed(&mut self, status: ConnectionStatus) {
        let p = self.palette;
        let text = match status {
            ConnectionStatus::Connected => "● connected".color(p.done),
            ConnectionStatus::Disconnected => "○ disconnected, reconnecting…".color(p.error),
        };
        self.line(format!("{}", text));
    }

    fn chats_changed(&mut self, database: &str, chats: &[ChatSummary]) {
        self.line(format!("{} {}", "chats in".dimmed(), database.bold()));
        for chat in chats {
            let star = if chat.starred { "★" } else { " " };
            self.line(format!(
                "  {} {:>5}  {}  {}",
                star,
                chat.id,
                chat.title,
                chat.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
            ));
        }
    }

    fn databases_changed(&mut self, databases: &[DatabaseInfo]) {
        self.line(format!("{}", "databases".dimmed()));
        for db in databases {
            if db.description.is_empty() {
                self.line(format!("  {}", db.name.bold()));
            } else {
                self.line(format!("  {}  {}", db.name.bold(), db.description.dimmed()));
            }
        }
    }

    fn description_loaded(&mut self, database: &str, description: &str) {
        if !description.is_empty() {
            self.line(format!("{} {}", format!("{}:", database).bold(), description.dimmed()));
        }
    }

    fn info(&mut self, message: &str) {
        let p = self.palette;
        self.line(format!("{}", message.color(p.system)));
    }

    fn theme_changed(&mut self, theme: Theme) {
        self.set_theme(theme);
    }
}
