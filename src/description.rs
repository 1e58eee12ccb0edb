//! Debounced auto-save of database descriptions
//!
//! Every edit restarts a quiet-period timer; when it elapses the trimmed
//! text is saved once. Leaving the editor (blur) or switching database
//! saves immediately. The tracker only decides *when* and *what* to save;
//! the chat client performs the request.

use std::time::Duration;
use tokio::time::Instant;

/// A save that is due now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionSave {
    /// Database whose description changed
    pub database: String,
    /// Trimmed description text
    pub text: String,
}

#[derive(Debug, Clone)]
struct PendingEdit {
    database: String,
    text: String,
    deadline: Instant,
}

/// Quiet-period tracker for description edits
#[derive(Debug, Clone)]
pub struct DescriptionAutosave {
    delay: Duration,
    pending: Option<PendingEdit>,
}

impl DescriptionAutosave {
    /// Tracker saving `delay` after the last edit
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Record an edit at `now` and restart the timer
    ///
    /// An edit for a different database than the pending one flushes the
    /// pending edit first; it is returned so no text is lost.
    pub fn edit(
        &mut self,
        database: &str,
        text: impl Into<String>,
        now: Instant,
    ) -> Option<DescriptionSave> {
        let flushed = match &self.pending {
            Some(pending) if pending.database != database => self.flush(),
            _ => None,
        };
        self.pending = Some(PendingEdit {
            database: database.to_string(),
            text: text.into(),
            deadline: now + self.delay,
        });
        flushed
    }

    /// Editor lost focus: save right away
    pub fn blur(&mut self) -> Option<DescriptionSave> {
        self.flush()
    }

    /// Save whatever is pending, regardless of the timer
    pub fn flush(&mut self) -> Option<DescriptionSave> {
        self.pending.take().map(|pending| DescriptionSave {
            database: pending.database,
            text: pending.text.trim().to_string(),
        })
    }

    /// Return the pending save if its quiet period has elapsed at `now`
    pub fn poll_due(&mut self, now: Instant) -> Option<DescriptionSave> {
        match &self.pending {
            Some(pending) if pending.deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// When the pending edit becomes due
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// True while an edit waits for its quiet period
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
