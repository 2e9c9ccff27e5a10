//! Who is online, and on which connection.
//!
//! The registry is process-local: a relay behind a load balancer needs a
//! shared implementation of [`PresenceRegistry`].

use async_trait::async_trait;
use chat_types::{ConnectionId, Username};
use dashmap::DashMap;

/// Username → live connection mapping.
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Bind `username` to `connection`, replacing any previous binding.
    ///
    /// Returns the superseded connection, if there was one.
    async fn register(&self, username: &Username, connection: ConnectionId)
        -> Option<ConnectionId>;

    /// Remove the binding only if it still points at `connection`.
    ///
    /// Returns whether anything was removed. A stale disconnect from a
    /// superseded connection leaves the newer session alone.
    async fn unregister(&self, username: &Username, connection: ConnectionId) -> bool;

    /// Current connection for `username`.
    async fn connection_of(&self, username: &Username) -> Option<ConnectionId>;

    /// Whether `username` has a live connection.
    async fn is_online(&self, username: &Username) -> bool {
        self.connection_of(username).await.is_some()
    }

    /// Sorted list of online usernames.
    async fn online_users(&self) -> Vec<Username>;

    /// Snapshot of every live binding.
    async fn online_sessions(&self) -> Vec<(Username, ConnectionId)>;

    /// Number of online users.
    async fn len(&self) -> usize;
}

/// In-process presence backed by a DashMap.
#[derive(Debug, Default)]
pub struct LocalPresence {
    sessions: DashMap<Username, ConnectionId>,
}

impl LocalPresence {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceRegistry for LocalPresence {
    async fn register(
        &self,
        username: &Username,
        connection: ConnectionId,
    ) -> Option<ConnectionId> {
        self.sessions
            .insert(username.clone(), connection)
            .filter(|previous| *previous != connection)
    }

    async fn unregister(&self, username: &Username, connection: ConnectionId) -> bool {
        self.sessions
            .remove_if(username, |_, current| *current == connection)
            .is_some()
    }

    async fn connection_of(&self, username: &Username) -> Option<ConnectionId> {
        self.sessions.get(username).map(|entry| *entry.value())
    }

    async fn online_users(&self) -> Vec<Username> {
        let mut users: Vec<Username> = self.sessions.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    async fn online_sessions(&self) -> Vec<(Username, ConnectionId)> {
        self.sessions
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let presence = LocalPresence::new();
        let a = ConnectionId::random();
        let b = ConnectionId::random();

        assert_eq!(presence.register(&user("alice"), a).await, None);
        assert_eq!(presence.register(&user("alice"), b).await, Some(a));
        assert_eq!(presence.connection_of(&user("alice")).await, Some(b));
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_session() {
        let presence = LocalPresence::new();
        let a = ConnectionId::random();
        let b = ConnectionId::random();
        presence.register(&user("alice"), a).await;
        presence.register(&user("alice"), b).await;

        assert!(!presence.unregister(&user("alice"), a).await);
        assert_eq!(presence.connection_of(&user("alice")).await, Some(b));

        assert!(presence.unregister(&user("alice"), b).await);
        assert!(!presence.is_online(&user("alice")).await);
    }

    #[tokio::test]
    async fn reregistering_same_connection_reports_nothing_superseded() {
        let presence = LocalPresence::new();
        let a = ConnectionId::random();
        presence.register(&user("alice"), a).await;
        assert_eq!(presence.register(&user("alice"), a).await, None);
    }

    #[tokio::test]
    async fn online_users_sorted() {
        let presence = LocalPresence::new();
        presence.register(&user("carol"), ConnectionId::random()).await;
        presence.register(&user("alice"), ConnectionId::random()).await;
        presence.register(&user("bob"), ConnectionId::random()).await;

        assert_eq!(
            presence.online_users().await,
            vec![user("alice"), user("bob"), user("carol")]
        );
        assert_eq!(presence.len().await, 3);
        assert_eq!(presence.online_sessions().await.len(), 3);
    }
}
