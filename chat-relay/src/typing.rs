//! Relay-side typing indicators.
//!
//! Every typing event from a sender re-arms a stop timer. When the sender
//! goes quiet for `typing.expiry_ms`, the recipient gets
//! `typing {isTyping: false}`. Each sender has at most one pending timer;
//! a newer event aborts the old one, and a generation number keeps a timer
//! that already fired from removing its replacement.

use crate::connections::ConnectionTable;
use crate::presence::PresenceRegistry;
use chat_types::{ServerEvent, TypingUpdate, Username};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Debug)]
struct PendingStop {
    recipient: Username,
    generation: u64,
    timer: AbortHandle,
}

/// Schedules and cancels typing stop events.
pub struct TypingCoordinator {
    presence: Arc<dyn PresenceRegistry>,
    connections: Arc<ConnectionTable>,
    expiry: Duration,
    pending: Arc<DashMap<Username, PendingStop>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for TypingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypingCoordinator")
            .field("expiry", &self.expiry)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

async fn notify(
    presence: &dyn PresenceRegistry,
    connections: &ConnectionTable,
    sender: &Username,
    recipient: &Username,
    is_typing: bool,
) {
    if let Some(connection) = presence.connection_of(recipient).await {
        connections.send(
            connection,
            ServerEvent::Typing(TypingUpdate {
                sender: sender.clone(),
                is_typing,
            }),
        );
    }
}

impl TypingCoordinator {
    /// Create a coordinator that emits stops after `expiry` of silence.
    pub fn new(
        presence: Arc<dyn PresenceRegistry>,
        connections: Arc<ConnectionTable>,
        expiry: Duration,
    ) -> Self {
        Self {
            presence,
            connections,
            expiry,
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Handle a typing event from `sender` addressed to `recipient`.
    ///
    /// `forward` is false when the event was throttled: it is not relayed,
    /// but it still keeps the indicator alive.
    pub async fn on_typing(&self, sender: &Username, recipient: &Username, forward: bool) {
        if forward {
            notify(
                self.presence.as_ref(),
                &self.connections,
                sender,
                recipient,
                true,
            )
            .await;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let replaced = {
            // Hold the entry while spawning so the timer cannot look up its
            // own slot before it has been filled.
            let entry = self.pending.entry(sender.clone());
            let timer = self.spawn_stop(sender.clone(), recipient.clone(), generation);
            let stop = PendingStop {
                recipient: recipient.clone(),
                generation,
                timer,
            };
            match entry {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    Some(occupied.insert(stop))
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(stop);
                    None
                }
            }
        };

        if let Some(previous) = replaced {
            previous.timer.abort();
            if previous.recipient != *recipient {
                notify(
                    self.presence.as_ref(),
                    &self.connections,
                    sender,
                    &previous.recipient,
                    false,
                )
                .await;
            }
        }
    }

    fn spawn_stop(&self, sender: Username, recipient: Username, generation: u64) -> AbortHandle {
        let pending = self.pending.clone();
        let presence = self.presence.clone();
        let connections = self.connections.clone();
        let expiry = self.expiry;

        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            let fired = pending
                .remove_if(&sender, |_, stop| stop.generation == generation)
                .is_some();
            if fired {
                tracing::debug!("typing from {} to {} expired", sender, recipient);
                notify(presence.as_ref(), &connections, &sender, &recipient, false).await;
            }
        })
        .abort_handle()
    }

    /// Cancel `sender`'s indicator immediately (disconnect).
    pub async fn clear(&self, sender: &Username) {
        if let Some((_, stop)) = self.pending.remove(sender) {
            stop.timer.abort();
            notify(
                self.presence.as_ref(),
                &self.connections,
                sender,
                &stop.recipient,
                false,
            )
            .await;
        }
    }

    /// Number of senders with a live indicator.
    pub fn active(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::Inbound;
    use crate::presence::LocalPresence;
    use chat_types::ConnectionId;

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    struct Fixture {
        coordinator: TypingCoordinator,
        presence: Arc<LocalPresence>,
        connections: Arc<ConnectionTable>,
    }

    impl Fixture {
        fn new() -> Self {
            let presence = Arc::new(LocalPresence::new());
            let connections = Arc::new(ConnectionTable::new());
            let coordinator = TypingCoordinator::new(
                presence.clone(),
                connections.clone(),
                Duration::from_millis(2000),
            );
            Self {
                coordinator,
                presence,
                connections,
            }
        }

        async fn online(&self, name: &str) -> Inbound {
            let id = ConnectionId::random();
            self.presence.register(&user(name), id).await;
            self.connections.open(id)
        }
    }

    fn typing(sender: &str, is_typing: bool) -> ServerEvent {
        ServerEvent::Typing(TypingUpdate {
            sender: user(sender),
            is_typing,
        })
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silence_emits_stop_after_expiry() {
        let fx = Fixture::new();
        let mut bob = fx.online("bob").await;

        fx.coordinator.on_typing(&user("alice"), &user("bob"), true).await;
        assert_eq!(bob.try_recv().unwrap(), typing("alice", true));

        tokio::time::advance(Duration::from_millis(1999)).await;
        settle().await;
        assert!(bob.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(bob.try_recv().unwrap(), typing("alice", false));
        assert_eq!(fx.coordinator.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_event_replaces_pending_stop() {
        let fx = Fixture::new();
        let mut bob = fx.online("bob").await;

        fx.coordinator.on_typing(&user("alice"), &user("bob"), true).await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        // Throttled, but still keeps the indicator alive.
        fx.coordinator.on_typing(&user("alice"), &user("bob"), false).await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;

        assert_eq!(bob.try_recv().unwrap(), typing("alice", true));
        assert!(bob.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert_eq!(bob.try_recv().unwrap(), typing("alice", false));
        // Exactly one stop.
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_recipient_stops_previous_immediately() {
        let fx = Fixture::new();
        let mut bob = fx.online("bob").await;
        let mut carol = fx.online("carol").await;

        fx.coordinator.on_typing(&user("alice"), &user("bob"), true).await;
        fx.coordinator.on_typing(&user("alice"), &user("carol"), true).await;

        assert_eq!(bob.try_recv().unwrap(), typing("alice", true));
        assert_eq!(bob.try_recv().unwrap(), typing("alice", false));
        assert_eq!(carol.try_recv().unwrap(), typing("alice", true));
        assert_eq!(fx.coordinator.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_notifies_and_cancels() {
        let fx = Fixture::new();
        let mut bob = fx.online("bob").await;

        fx.coordinator.on_typing(&user("alice"), &user("bob"), true).await;
        fx.coordinator.clear(&user("alice")).await;

        assert_eq!(bob.try_recv().unwrap(), typing("alice", true));
        assert_eq!(bob.try_recv().unwrap(), typing("alice", false));

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_recipient_gets_nothing() {
        let fx = Fixture::new();
        fx.coordinator.on_typing(&user("alice"), &user("bob"), true).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(fx.coordinator.active(), 0);
    }
}
