//! SQLite storage backend for veilchat-relay.

use super::{
    check_key_length, current_timestamp, IdentityDirectory, OfflineQueue, QueueSettings,
    QueuedMessage, Registration,
};
use crate::error::{DirectoryError, StorageError};
use async_trait::async_trait;
use chat_types::Username;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed identity directory and offline queue.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    settings: QueueSettings,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path, settings: QueueSettings) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let storage = Self { pool, settings };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::in_memory_with(QueueSettings::default()).await
    }

    /// In-memory SQLite storage with explicit queue limits.
    pub async fn in_memory_with(settings: QueueSettings) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection: each :memory: connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool, settings };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS identities (
                username TEXT PRIMARY KEY,
                public_key BLOB NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS queue_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS queue_expiry (
                recipient TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_queue_recipient ON queue_entries(recipient, id)",
            "CREATE INDEX IF NOT EXISTS idx_queue_expires ON queue_expiry(expires_at)",
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
        }
        Ok(())
    }

    async fn stored_key(&self, username: &Username) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar("SELECT public_key FROM identities WHERE username = ?1")
            .bind(username.as_str())
            .fetch_optional(&self.pool)
            .await
    }
}

#[async_trait]
impl IdentityDirectory for SqliteStorage {
    async fn register(
        &self,
        username: &Username,
        public_key: &[u8],
    ) -> Result<Registration, DirectoryError> {
        check_key_length(public_key)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO identities (username, public_key, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(username) DO NOTHING
            "#,
        )
        .bind(username.as_str())
        .bind(public_key)
        .bind(current_timestamp())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) if result.rows_affected() == 1 => Ok(Registration::Created),
            Ok(_) => match self.stored_key(username).await? {
                Some(existing) if existing == public_key => Ok(Registration::Existing),
                _ => Err(DirectoryError::Conflict(username.clone())),
            },
            // The username was free, so the violated constraint is the key.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(DirectoryError::PublicKeyTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(&self, username: &Username) -> Result<Vec<u8>, DirectoryError> {
        self.stored_key(username)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(username.clone()))
    }

    async fn is_available(&self, username: &Username) -> Result<bool, DirectoryError> {
        Ok(self.stored_key(username).await?.is_none())
    }
}

#[async_trait]
impl OfflineQueue for SqliteStorage {
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), StorageError> {
        let payload = serde_json::to_string(message)?;
        let recipient = message.recipient.as_str();
        let now = current_timestamp();

        let mut tx = self.pool.begin().await?;

        // A list past its expiry is dead even if cleanup hasn't run yet.
        sqlx::query(
            r#"
            DELETE FROM queue_entries WHERE recipient = ?1 AND EXISTS (
                SELECT 1 FROM queue_expiry WHERE recipient = ?1 AND expires_at <= ?2
            )
            "#,
        )
        .bind(recipient)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE recipient = ?1")
                .bind(recipient)
                .fetch_one(&mut *tx)
                .await?;
        if count as usize >= self.settings.max_len {
            return Err(StorageError::QueueFull {
                recipient: message.recipient.clone(),
                limit: self.settings.max_len,
            });
        }

        sqlx::query(
            "INSERT INTO queue_entries (recipient, payload, enqueued_at) VALUES (?1, ?2, ?3)",
        )
        .bind(recipient)
        .bind(&payload)
        .bind(message.enqueued_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO queue_expiry (recipient, expires_at) VALUES (?1, ?2)
            ON CONFLICT(recipient) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(recipient)
        .bind(now + self.settings.ttl_secs as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn drain(&self, recipient: &Username) -> Result<Vec<QueuedMessage>, StorageError> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        let expires_at: Option<i64> =
            sqlx::query_scalar("DELETE FROM queue_expiry WHERE recipient = ?1 RETURNING expires_at")
                .bind(recipient.as_str())
                .fetch_optional(&mut *tx)
                .await?;

        let mut rows: Vec<(i64, String)> =
            sqlx::query_as("DELETE FROM queue_entries WHERE recipient = ?1 RETURNING id, payload")
                .bind(recipient.as_str())
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;

        match expires_at {
            Some(expiry) if expiry > now => {}
            _ => return Ok(Vec::new()),
        }

        // RETURNING order is unspecified.
        rows.sort_by_key(|(id, _)| *id);
        // One unreadable row must not cost the recipient the rest of the mailbox.
        let messages: Vec<QueuedMessage> = rows
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!("dropping unreadable queue entry {} for {}: {}", id, recipient, e);
                    None
                }
            })
            .collect();
        Ok(messages)
    }

    async fn pending_count(&self, recipient: &Username) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM queue_entries e
            JOIN queue_expiry x ON x.recipient = e.recipient
            WHERE e.recipient = ?1 AND x.expires_at > ?2
            "#,
        )
        .bind(recipient.as_str())
        .bind(current_timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn cleanup_expired(&self) -> Result<u64, StorageError> {
        let now = current_timestamp();
        let mut tx = self.pool.begin().await?;

        // Delete entries first so the subquery still sees the expiry rows.
        let result = sqlx::query(
            r#"
            DELETE FROM queue_entries WHERE recipient IN (
                SELECT recipient FROM queue_expiry WHERE expires_at <= ?1
            )
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM queue_expiry WHERE expires_at <= ?1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
