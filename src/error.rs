//! Error types for DbaChat
//!
//! This module defines all error types used throughout the client,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for DbaChat operations
///
/// Covers configuration loading, client-side validation, the socket
/// transport, REST calls to the directory service, attachments and the
/// client-local state store.
#[derive(Error, Debug)]
pub enum DbaChatError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client-side validation failed before any network call was made
    #[error("{0}")]
    Validation(String),

    /// A send was attempted while the socket is not open
    #[error("Not connected to the server. Reconnecting, please try again")]
    NotConnected,

    /// Socket-level failures (connect, read, write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered a REST call with a non-success status
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Body or reason returned by the server
        message: String,
    },

    /// Attachment rejected or unreadable
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// Client-local state store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed server URL
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for DbaChat operations
///
/// Uses `anyhow::Error` so callers can attach context while still being
/// able to downcast to [`DbaChatError`].
pub type Result<T> = anyhow::Result<T>;
