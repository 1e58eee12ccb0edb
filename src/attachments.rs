//! File attachments
//!
//! Attachments are text-like files uploaded to the current chat before the
//! message that references them is sent. Files are checked against an
//! extension allow-list and a size limit, and deduplicated by name and size
//! so that attaching the same file twice uploads it once.

use crate::config::AttachmentsConfig;
use crate::error::{DbaChatError, Result};
use std::path::Path;

/// A file staged for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name as shown to the server (no directory part)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// File contents
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Build an attachment from in-memory contents
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }

    /// Lowercased extension without the dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    fn same_file(&self, other: &Attachment) -> bool {
        self.name == other.name && self.size == other.size
    }
}

/// Validates and collects attachments for the next message
#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

impl AttachmentPolicy {
    /// Build a policy from configuration
    pub fn new(config: &AttachmentsConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            max_file_size: config.max_file_size_bytes,
        }
    }

    /// Check a single attachment against the allow-list and size limit
    ///
    /// # Errors
    ///
    /// Returns [`DbaChatError::Attachment`] naming the offending file.
    pub fn check(&self, attachment: &Attachment) -> Result<()> {
        let allowed = attachment
            .extension()
            .map(|ext| self.allowed_extensions.contains(&ext))
            .unwrap_or(false);
        if !allowed {
            return Err(DbaChatError::Attachment(format!(
                "{} is not a supported file type (allowed: {})",
                attachment.name,
                self.allowed_extensions.join(", ")
            ))
            .into());
        }

        if attachment.size > self.max_file_size {
            return Err(DbaChatError::Attachment(format!(
                "{} is too large ({} bytes, limit {})",
                attachment.name, attachment.size, self.max_file_size
            ))
            .into());
        }

        Ok(())
    }

    /// Read a file from disk and check it
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is rejected by
    /// [`AttachmentPolicy::check`].
    pub fn load(&self, path: &Path) -> Result<Attachment> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DbaChatError::Attachment(format!("Invalid file name: {}", path.display()))
            })?
            .to_string();

        let metadata = std::fs::metadata(path).map_err(|e| {
            DbaChatError::Attachment(format!("Cannot read {}: {}", path.display(), e))
        })?;
        if metadata.len() > self.max_file_size {
            return Err(DbaChatError::Attachment(format!(
                "{} is too large ({} bytes, limit {})",
                name,
                metadata.len(),
                self.max_file_size
            ))
            .into());
        }

        let bytes = std::fs::read(path).map_err(|e| {
            DbaChatError::Attachment(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let attachment = Attachment::from_bytes(name, bytes);
        self.check(&attachment)?;
        Ok(attachment)
    }

    /// Add `attachment` to `staged` unless a file with the same name and
    /// size is already there
    ///
    /// Returns true when the attachment was added.
    pub fn stage(&self, staged: &mut Vec<Attachment>, attachment: Attachment) -> Result<bool> {
        self.check(&attachment)?;
        if staged.iter().any(|existing| existing.same_file(&attachment)) {
            tracing::debug!(name = %attachment.name, "Skipping duplicate attachment");
            return Ok(false);
        }
        staged.push(attachment);
        Ok(true)
    }
}

/// Remove duplicates (same name and size), keeping first occurrences
pub fn dedup(attachments: Vec<Attachment>) -> Vec<Attachment> {
    let mut unique: Vec<Attachment> = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        if !unique.iter().any(|a| a.same_file(&attachment)) {
            unique.push(attachment);
        }
    }
    unique
}
