//! Configuration management for DbaChat
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{DbaChatError, Result};
use crate::protocol::Role;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for DbaChat
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server endpoints and timeouts
    #[serde(default)]
    pub server: ServerConfig,
    /// Socket reconnect behaviour
    #[serde(default)]
    pub transport: TransportConfig,
    /// Chat view behaviour
    #[serde(default)]
    pub chat: ChatConfig,
    /// Attachment rules
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    /// Client-local state
    #[serde(default)]
    pub storage: StorageConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the service (REST and socket share it)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the socket endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Timeout for each REST request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Timeout for opening the socket (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_path: default_ws_path(),
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl ServerConfig {
    /// Parsed REST base URL
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid http(s) URL.
    pub fn rest_url(&self) -> Result<url::Url> {
        let url = url::Url::parse(&self.base_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(DbaChatError::Config(format!(
                "server.base_url must use http or https, got {}",
                other
            ))
            .into()),
        }
    }

    /// Socket URL derived from the base URL (`http` -> `ws`, `https` -> `wss`)
    ///
    /// # Examples
    ///
    /// ```
    /// use dbachat::config::ServerConfig;
    ///
    /// let server = ServerConfig::default();
    /// assert_eq!(server.ws_url().unwrap().as_str(), "ws://localhost:8888/ws");
    /// ```
    pub fn ws_url(&self) -> Result<url::Url> {
        let mut url = self.rest_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| {
            DbaChatError::Config(format!("Cannot derive socket URL from {}", self.base_url))
        })?;
        url.set_path(&self.ws_path);
        Ok(url)
    }

    /// REST request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Socket connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Reconnect strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every attempt
    #[default]
    Flat,
    /// Doubling delay up to a cap, optionally jittered
    Exponential,
}

/// Socket reconnect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Reconnect strategy
    #[serde(default)]
    pub backoff: BackoffKind,

    /// Delay before the first reconnect attempt (milliseconds)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for exponential backoff (milliseconds)
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    /// Randomise exponential delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::default(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Chat view configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Role announced when no preference is stored
    #[serde(default)]
    pub default_role: Role,

    /// Follow streamed output only within this distance of the bottom
    #[serde(default = "default_autoscroll_threshold")]
    pub autoscroll_threshold: u32,

    /// Quiet period before a description edit is saved (milliseconds)
    #[serde(default = "default_description_save_delay")]
    pub description_save_delay_ms: u64,

    /// Maximum characters of a title derived from the first message
    #[serde(default = "default_max_title_length")]
    pub max_title_length: usize,
}

fn default_autoscroll_threshold() -> u32 {
    80
}

fn default_description_save_delay() -> u64 {
    500
}

fn default_max_title_length() -> usize {
    60
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_role: Role::default(),
            autoscroll_threshold: default_autoscroll_threshold(),
            description_save_delay_ms: default_description_save_delay(),
            max_title_length: default_max_title_length(),
        }
    }
}

impl ChatConfig {
    /// Description auto-save delay
    pub fn description_save_delay(&self) -> Duration {
        Duration::from_millis(self.description_save_delay_ms)
    }
}

/// Attachment rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsConfig {
    /// Extensions (without dot) accepted for upload
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Largest accepted file
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "txt", "md", "sql", "csv", "json", "xml", "log", "yaml", "yml", "tsv", "ini", "cfg",
        "conf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    5 * 1024 * 1024
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

/// Client-local state configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Directory of the state store; platform data dir when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Log file path (if None, stderr only)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DbaChatError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| DbaChatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("DBACHAT_SERVER_URL") {
            self.server.base_url = url;
        }

        if let Ok(delay) = std::env::var("DBACHAT_RECONNECT_DELAY_MS") {
            if let Ok(value) = delay.parse() {
                self.transport.reconnect_delay_ms = value;
            } else {
                tracing::warn!("Invalid DBACHAT_RECONNECT_DELAY_MS: {}", delay);
            }
        }

        if let Ok(backoff) = std::env::var("DBACHAT_BACKOFF") {
            match backoff.to_lowercase().as_str() {
                "flat" => self.transport.backoff = BackoffKind::Flat,
                "exponential" => self.transport.backoff = BackoffKind::Exponential,
                _ => tracing::warn!("Invalid DBACHAT_BACKOFF: {}", backoff),
            }
        }

        if let Ok(dir) = std::env::var("DBACHAT_STATE_DIR") {
            self.storage.state_dir = Some(PathBuf::from(dir));
        }

        if let Ok(file) = std::env::var("DBACHAT_LOG_FILE") {
            self.logging.file_path = Some(PathBuf::from(file));
        }

        if let Ok(role) = std::env::var("DBACHAT_ROLE") {
            match Role::parse_str(&role) {
                Ok(role) => self.chat.default_role = role,
                Err(e) => tracing::warn!("Invalid DBACHAT_ROLE: {}", e),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(server) = &cli.server {
            tracing::debug!("Using server override from CLI: {}", server);
            self.server.base_url = server.clone();
        }
        if let Some(dir) = &cli.state_dir {
            self.storage.state_dir = Some(dir.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        self.server.rest_url().map_err(|e| {
            DbaChatError::Config(format!("Invalid server.base_url {}: {}", self.server.base_url, e))
        })?;

        if !self.server.ws_path.starts_with('/') {
            return Err(
                DbaChatError::Config("server.ws_path must start with '/'".to_string()).into(),
            );
        }

        if self.server.request_timeout_seconds == 0 || self.server.connect_timeout_seconds == 0 {
            return Err(
                DbaChatError::Config("server timeouts must be greater than 0".to_string()).into(),
            );
        }

        if self.transport.reconnect_delay_ms == 0 {
            return Err(DbaChatError::Config(
                "transport.reconnect_delay_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.transport.backoff == BackoffKind::Exponential
            && self.transport.max_reconnect_delay_ms < self.transport.reconnect_delay_ms
        {
            return Err(DbaChatError::Config(
                "transport.max_reconnect_delay_ms must not be smaller than reconnect_delay_ms"
                    .to_string(),
            )
            .into());
        }

        if self.chat.max_title_length == 0 {
            return Err(DbaChatError::Config(
                "chat.max_title_length must be greater than 0".to_string(),
            )
            .into());
        }

        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(DbaChatError::Config(format!(
                "logging.level must be one of trace, debug, info, warn, error; got {}",
                self.logging.level
            ))
            .into());
        }

        if self.attachments.allowed_extensions.is_empty() {
            return Err(DbaChatError::Config(
                "attachments.allowed_extensions cannot be empty".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
