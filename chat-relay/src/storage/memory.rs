//! In-memory storage backend.
//!
//! Same semantics as [`SqliteStorage`](super::SqliteStorage), nothing
//! persisted. Used by tests and `database = ":memory:"` deployments that
//! don't want a SQLite file.

use super::{
    check_key_length, current_timestamp, IdentityDirectory, OfflineQueue, QueueSettings,
    QueuedMessage, Registration,
};
use crate::error::{DirectoryError, StorageError};
use async_trait::async_trait;
use chat_types::Username;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    identities: HashMap<Username, Vec<u8>>,
    key_owners: HashMap<Vec<u8>, Username>,
    queues: HashMap<Username, QueueList>,
}

#[derive(Debug)]
struct QueueList {
    entries: Vec<QueuedMessage>,
    expires_at: i64,
}

/// Identity directory and offline queue held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    settings: QueueSettings,
}

impl MemoryStorage {
    /// Empty storage with default queue limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty storage with explicit queue limits.
    pub fn with_settings(settings: QueueSettings) -> Self {
        Self {
            inner: Mutex::default(),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IdentityDirectory for MemoryStorage {
    async fn register(
        &self,
        username: &Username,
        public_key: &[u8],
    ) -> Result<Registration, DirectoryError> {
        check_key_length(public_key)?;
        let mut inner = self.lock();

        match inner.identities.get(username) {
            Some(existing) if existing.as_slice() == public_key => {
                return Ok(Registration::Existing)
            }
            Some(_) => return Err(DirectoryError::Conflict(username.clone())),
            None => {}
        }
        if inner.key_owners.contains_key(public_key) {
            return Err(DirectoryError::PublicKeyTaken);
        }

        inner
            .identities
            .insert(username.clone(), public_key.to_vec());
        inner
            .key_owners
            .insert(public_key.to_vec(), username.clone());
        Ok(Registration::Created)
    }

    async fn lookup(&self, username: &Username) -> Result<Vec<u8>, DirectoryError> {
        self.lock()
            .identities
            .get(username)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(username.clone()))
    }

    async fn is_available(&self, username: &Username) -> Result<bool, DirectoryError> {
        Ok(!self.lock().identities.contains_key(username))
    }
}

#[async_trait]
impl OfflineQueue for MemoryStorage {
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), StorageError> {
        let now = current_timestamp();
        let mut inner = self.lock();
        let list = inner
            .queues
            .entry(message.recipient.clone())
            .or_insert_with(|| QueueList {
                entries: Vec::new(),
                expires_at: now,
            });

        if list.expires_at <= now {
            list.entries.clear();
        }
        if list.entries.len() >= self.settings.max_len {
            return Err(StorageError::QueueFull {
                recipient: message.recipient.clone(),
                limit: self.settings.max_len,
            });
        }

        list.entries.push(message.clone());
        list.expires_at = now + self.settings.ttl_secs as i64;
        Ok(())
    }

    async fn drain(&self, recipient: &Username) -> Result<Vec<QueuedMessage>, StorageError> {
        let now = current_timestamp();
        match self.lock().queues.remove(recipient) {
            Some(list) if list.expires_at > now => Ok(list.entries),
            _ => Ok(Vec::new()),
        }
    }

    async fn pending_count(&self, recipient: &Username) -> Result<u64, StorageError> {
        let now = current_timestamp();
        Ok(self
            .lock()
            .queues
            .get(recipient)
            .filter(|list| list.expires_at > now)
            .map_or(0, |list| list.entries.len() as u64))
    }

    async fn cleanup_expired(&self) -> Result<u64, StorageError> {
        let now = current_timestamp();
        let mut removed = 0u64;
        self.lock().queues.retain(|_, list| {
            let live = list.expires_at > now;
            if !live {
                removed += list.entries.len() as u64;
            }
            live
        });
        Ok(removed)
    }
}
