//! Storage layer for veilchat-relay.
//!
//! Two stores live here:
//! - the identity directory (username → X25519 public key)
//! - per-recipient offline queues with a TTL reset on every push
//!
//! Both have a SQLite backend and an in-memory backend.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use crate::config::StorageConfig;
use crate::error::{DirectoryError, StorageError};
use async_trait::async_trait;
use chat_types::{IncomingMessage, MessageId, MessageStatus, Username};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of an X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New identity stored.
    Created,
    /// Same username and key were already registered.
    Existing,
}

/// A message held for an offline recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Who sent it.
    pub sender: Username,
    /// Who it is for.
    pub recipient: Username,
    /// Sender-generated ID.
    pub message_id: MessageId,
    /// Envelope, untouched.
    pub encrypted_content: String,
    /// Self-destruct timer in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<u32>,
    /// Unix seconds when the relay queued it.
    pub enqueued_at: i64,
}

impl QueuedMessage {
    /// Build the event delivered when the recipient comes back online.
    pub fn into_delivery(self) -> IncomingMessage {
        IncomingMessage {
            sender: self.sender,
            encrypted_content: self.encrypted_content,
            timer: self.timer,
            message_id: self.message_id,
            status: MessageStatus::Received,
        }
    }
}

/// Offline queue limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Lifetime of a recipient's list, measured from its last push.
    pub ttl_secs: u64,
    /// Maximum entries per recipient.
    pub max_len: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        StorageConfig::default().into()
    }
}

impl From<StorageConfig> for QueueSettings {
    fn from(config: StorageConfig) -> Self {
        Self {
            ttl_secs: config.queue_ttl_secs,
            max_len: config.max_queue_len,
        }
    }
}

/// Username → public key directory.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Bind `public_key` to `username`.
    ///
    /// Idempotent for the same pair; a different key for a known username is
    /// a [`DirectoryError::Conflict`].
    async fn register(
        &self,
        username: &Username,
        public_key: &[u8],
    ) -> Result<Registration, DirectoryError>;

    /// Public key registered for `username`.
    async fn lookup(&self, username: &Username) -> Result<Vec<u8>, DirectoryError>;

    /// Whether `username` is still free.
    async fn is_available(&self, username: &Username) -> Result<bool, DirectoryError>;
}

/// Per-recipient store-and-forward queue.
#[async_trait]
pub trait OfflineQueue: Send + Sync {
    /// Append a message and reset the recipient's list expiry.
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), StorageError>;

    /// Remove and return every live message for `recipient`, oldest first.
    ///
    /// Atomic: concurrent drains never return the same entry twice.
    async fn drain(&self, recipient: &Username) -> Result<Vec<QueuedMessage>, StorageError>;

    /// Number of live messages waiting for `recipient`.
    async fn pending_count(&self, recipient: &Username) -> Result<u64, StorageError>;

    /// Delete expired lists. Returns the number of messages removed.
    async fn cleanup_expired(&self) -> Result<u64, StorageError>;
}

/// Reject keys that are not exactly [`PUBLIC_KEY_SIZE`] bytes.
pub(crate) fn check_key_length(public_key: &[u8]) -> Result<(), DirectoryError> {
    if public_key.len() != PUBLIC_KEY_SIZE {
        return Err(DirectoryError::InvalidKey {
            expected: PUBLIC_KEY_SIZE,
            actual: public_key.len(),
        });
    }
    Ok(())
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
