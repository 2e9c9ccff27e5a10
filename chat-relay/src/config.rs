//! Configuration loading for veilchat-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! field has a default and every section may be omitted.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration for veilchat-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// Message routing behaviour.
    pub messaging: MessagingConfig,
    /// Typing indicator timing.
    pub typing: TypingConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Cleanup task configuration.
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for HTTP and WebSocket traffic (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file, or `:memory:` for an in-process store.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Offline queue TTL in seconds, reset on every push (default: 7 days).
    #[serde(default = "default_queue_ttl")]
    pub queue_ttl_secs: u64,
    /// Maximum queued messages per recipient (default: 1000).
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum new connections per IP address per minute (default: 10).
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Maximum messages per user per minute (default: 100).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Seconds a connection may stay silent before registering (default: 10).
    #[serde(default = "default_register_timeout_secs")]
    pub register_timeout_secs: u64,
    /// Maximum simultaneous WebSocket sessions (default: 10000).
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Global request rate across all clients (default: 1000/s).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Maximum decoded envelope size in bytes (default: 64 KiB).
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// How many delivered messages to remember for read receipts (default: 100000).
    #[serde(default = "default_max_tracked_receipts")]
    pub max_tracked_receipts: usize,
}

/// Message routing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Queue messages for offline recipients when the sender doesn't say (default: true).
    #[serde(default = "default_queue_by_default")]
    pub queue_by_default: bool,
    /// Largest accepted self-destruct timer in seconds (default: 7 days).
    #[serde(default = "default_max_timer_secs")]
    pub max_timer_secs: u32,
}

/// Typing indicator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingConfig {
    /// Minimum gap between forwarded typing events per sender (default: 1000 ms).
    #[serde(default = "default_typing_throttle_ms")]
    pub throttle_ms: u64,
    /// Silence after which a stop event is sent (default: 2000 ms).
    #[serde(default = "default_typing_expiry_ms")]
    pub expiry_ms: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("relay.db")
}

fn default_queue_ttl() -> u64 {
    7 * 24 * 60 * 60 // 7 days in seconds
}

fn default_max_queue_len() -> usize {
    1000
}

fn default_connections_per_ip() -> u32 {
    10
}

fn default_messages_per_minute() -> u32 {
    100
}

fn default_register_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent_sessions() -> usize {
    10_000
}

fn default_global_requests_per_second() -> u32 {
    1000
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_max_tracked_receipts() -> usize {
    100_000
}

fn default_queue_by_default() -> bool {
    true
}

fn default_max_timer_secs() -> u32 {
    7 * 24 * 60 * 60
}

fn default_typing_throttle_ms() -> u64 {
    1000
}

fn default_typing_expiry_ms() -> u64 {
    2000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            queue_ttl_secs: default_queue_ttl(),
            max_queue_len: default_max_queue_len(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_ip: default_connections_per_ip(),
            messages_per_minute: default_messages_per_minute(),
            register_timeout_secs: default_register_timeout_secs(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            global_requests_per_second: default_global_requests_per_second(),
            max_message_bytes: default_max_message_bytes(),
            max_tracked_receipts: default_max_tracked_receipts(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            queue_by_default: default_queue_by_default(),
            max_timer_secs: default_max_timer_secs(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_typing_throttle_ms(),
            expiry_ms: default_typing_expiry_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load configuration, falling back to defaults if the file does not exist.
    ///
    /// A file that exists but cannot be parsed is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(
                "config file {} not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
