//! Error types for veilchat-relay.

use std::path::PathBuf;

use chat_types::{ChatError, Username};

/// Main error type for veilchat-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Identity directory error.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A queued message could not be (de)serialized.
    #[error("queue entry encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Recipient's offline queue is at capacity.
    #[error("offline queue for {recipient} is full (limit: {limit})")]
    QueueFull {
        /// Recipient whose queue is full.
        recipient: Username,
        /// Configured per-recipient limit.
        limit: usize,
    },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Identity directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Username is registered with a different key.
    #[error("username {0} is already registered with a different key")]
    Conflict(Username),

    /// Key is already bound to another username.
    #[error("public key is already registered to another user")]
    PublicKeyTaken,

    /// Public key has the wrong length.
    #[error("invalid public key: expected {expected} bytes, got {actual}")]
    InvalidKey {
        /// Required key length.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },

    /// No identity for this username.
    #[error("user not found: {0}")]
    NotFound(Username),

    /// Backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for DirectoryError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(e))
    }
}

/// Protocol layer errors.
///
/// All of these are reported to the offending connection as an `error` event;
/// none of them close it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame failed to parse or validate.
    #[error("malformed event: {0}")]
    Malformed(#[from] ChatError),

    /// Invalid message payload.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Reason the message is invalid.
        reason: String,
    },

    /// Event requires a registered session.
    #[error("session not registered")]
    NotRegistered,

    /// A newer connection registered the same username.
    #[error("signed in from another connection")]
    Superseded,

    /// `register` sent twice on one connection.
    #[error("session already registered")]
    AlreadyRegistered,

    /// Username is not in the directory.
    #[error("user not found: {0}")]
    UnknownUser(Username),

    /// Supplied key differs from the registered one.
    #[error("public key does not match registration for {0}")]
    KeyMismatch(Username),

    /// Envelope exceeds the configured limit.
    #[error("message too large: {size} bytes (limit: {limit})")]
    MessageTooLarge {
        /// Decoded envelope size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Self-destruct timer exceeds the configured limit.
    #[error("timer too long: {timer}s (limit: {limit}s)")]
    TimerTooLong {
        /// Requested timer.
        timer: u32,
        /// Configured limit.
        limit: u32,
    },

    /// Room password mismatch.
    #[error("incorrect password for room {0}")]
    RoomPassword(String),

    /// Connection is not a member of the room.
    #[error("not a member of room {0}")]
    NotInRoom(String),

    /// Sender exceeded its message quota.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Storage or directory backend failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Text for the `error` event sent back to the client.
    ///
    /// Parse errors are summarized so internal serde detail is not echoed.
    pub fn client_message(&self) -> String {
        match self {
            Self::Malformed(_) => "invalid payload".to_string(),
            Self::NotRegistered => "not registered".to_string(),
            Self::UnknownUser(_) => "user not found".to_string(),
            Self::RoomPassword(_) => "incorrect room password".to_string(),
            Self::RateLimited => "rate limit exceeded".to_string(),
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
