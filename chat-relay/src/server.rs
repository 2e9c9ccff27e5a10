//! Main relay server logic.
//!
//! [`ChatRelay`] routes realtime events between live connections. It never
//! sees plaintext: envelopes are checked for shape and size, then forwarded
//! untouched or parked in the offline queue.

use crate::config::Config;
use crate::connections::{ConnectionTable, Inbound};
use crate::error::{DirectoryError, ProtocolError, ProtocolResult, StorageError};
use crate::limits::RateLimits;
use crate::presence::{LocalPresence, PresenceRegistry};
use crate::rooms::{Delivery, RoomRelay};
use crate::storage::{current_timestamp, IdentityDirectory, OfflineQueue, QueuedMessage};
use crate::typing::TypingCoordinator;
use base64::{engine::general_purpose::STANDARD, Engine};
use chat_types::{
    ConnectionId, Envelope, IncomingMessage, JoinRoom, MessageId, MessageRead, MessageStatus,
    OutgoingMessage, Register, Registered, RoomPost, ServerEvent, StatusUpdate, TypingNotice,
    Username,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Reason sent with `failed` when the recipient is not in the directory.
pub const REASON_UNKNOWN_USER: &str = "user not found";
/// Reason sent with `failed` when the recipient is offline and queuing is off.
pub const REASON_OFFLINE: &str = "recipient offline";
/// Reason sent with `failed` when the recipient's queue is at capacity.
pub const REASON_QUEUE_FULL: &str = "recipient queue full";
/// Reason sent with `failed` when a backend errored.
pub const REASON_INTERNAL: &str = "internal error";
/// Sent to a connection whose username registered again elsewhere.
pub const REASON_SUPERSEDED: &str = "signed in from another connection";

/// Runtime metrics counters (monotonic since startup).
///
/// All counters use `Relaxed` ordering, sufficient for statistics.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections accepted.
    pub connections_total: AtomicU64,
    /// Successful `register` events.
    pub registrations_total: AtomicU64,
    /// Messages forwarded to a live recipient.
    pub messages_delivered: AtomicU64,
    /// Messages parked in an offline queue.
    pub messages_queued: AtomicU64,
    /// Messages acked `failed`.
    pub messages_failed: AtomicU64,
    /// Queued messages handed over on registration.
    pub messages_drained: AtomicU64,
    /// Read receipts forwarded to senders.
    pub receipts_forwarded: AtomicU64,
    /// Typing events forwarded (after throttling).
    pub typing_forwarded: AtomicU64,
    /// Envelope bytes accepted from senders.
    pub bytes_relayed: AtomicU64,
    /// Total rate limit rejections.
    pub rate_limit_hits: AtomicU64,
    /// Total protocol errors reported to clients.
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bounded messageId → (sender, recipient) map for read receipts.
#[derive(Debug)]
struct ReceiptLedger {
    entries: HashMap<MessageId, (Username, Username)>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl ReceiptLedger {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn record(&mut self, id: MessageId, sender: Username, recipient: Username) {
        if self.entries.insert(id.clone(), (sender, recipient)).is_some() {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    /// Take the entry if `reader` is its recipient.
    fn take_for(&mut self, id: &MessageId, reader: &Username) -> Option<Username> {
        match self.entries.get(id) {
            Some((_, recipient)) if recipient == reader => {
                self.order.retain(|queued| queued != id);
                self.entries.remove(id).map(|(sender, _)| sender)
            }
            _ => None,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The chat relay server.
pub struct ChatRelay {
    config: Config,
    directory: Arc<dyn IdentityDirectory>,
    queue: Arc<dyn OfflineQueue>,
    presence: Arc<dyn PresenceRegistry>,
    connections: Arc<ConnectionTable>,
    typing: TypingCoordinator,
    rooms: RoomRelay,
    receipts: Mutex<ReceiptLedger>,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    started: Instant,
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("connections", &self.connections.len())
            .field("rooms", &self.rooms)
            .field("typing", &self.typing)
            .field("rate_limits", &self.rate_limits)
            .finish_non_exhaustive()
    }
}

impl ChatRelay {
    /// Create a relay with process-local presence.
    pub fn new(
        config: Config,
        directory: Arc<dyn IdentityDirectory>,
        queue: Arc<dyn OfflineQueue>,
    ) -> Self {
        Self::with_presence(config, directory, queue, Arc::new(LocalPresence::new()))
    }

    /// Create a relay whose directory and queue share one backend.
    pub fn with_storage<S>(config: Config, storage: Arc<S>) -> Self
    where
        S: IdentityDirectory + OfflineQueue + 'static,
    {
        Self::new(config, storage.clone(), storage)
    }

    /// Create a relay with an injected presence registry.
    pub fn with_presence(
        config: Config,
        directory: Arc<dyn IdentityDirectory>,
        queue: Arc<dyn OfflineQueue>,
        presence: Arc<dyn PresenceRegistry>,
    ) -> Self {
        let connections = Arc::new(ConnectionTable::new());
        let typing = TypingCoordinator::new(
            presence.clone(),
            connections.clone(),
            Duration::from_millis(config.typing.expiry_ms),
        );
        let rate_limits = RateLimits::new(&config.limits, &config.typing);
        let receipts = Mutex::new(ReceiptLedger::new(config.limits.max_tracked_receipts));

        Self {
            config,
            directory,
            queue,
            presence,
            connections,
            typing,
            rooms: RoomRelay::new(),
            receipts,
            rate_limits,
            metrics: RelayMetrics::default(),
            started: Instant::now(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the identity directory.
    pub fn directory(&self) -> &dyn IdentityDirectory {
        self.directory.as_ref()
    }

    /// Get the offline queue.
    pub fn queue(&self) -> &dyn OfflineQueue {
        self.queue.as_ref()
    }

    /// Get the presence registry.
    pub fn presence(&self) -> &dyn PresenceRegistry {
        self.presence.as_ref()
    }

    /// Get the room registry.
    pub fn rooms(&self) -> &RoomRelay {
        &self.rooms
    }

    /// Get the typing coordinator.
    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    /// Get the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get the runtime metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Seconds since the relay was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of open connections, registered or not.
    pub fn total_sessions(&self) -> usize {
        self.connections.len()
    }

    /// Number of read receipts being tracked.
    pub fn tracked_receipts(&self) -> usize {
        self.lock_receipts().len()
    }

    fn lock_receipts(&self) -> MutexGuard<'_, ReceiptLedger> {
        self.receipts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a connection ID and its outbound channel.
    pub fn open_connection(&self) -> (ConnectionId, Inbound) {
        let id = ConnectionId::random();
        let inbound = self.connections.open(id);
        RelayMetrics::bump(&self.metrics.connections_total);
        (id, inbound)
    }

    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for (connection, event) in deliveries {
            self.connections.send(connection, event);
        }
    }

    fn ack(&self, connection: ConnectionId, update: StatusUpdate) {
        if update.status == MessageStatus::Failed {
            RelayMetrics::bump(&self.metrics.messages_failed);
        }
        self.connections
            .send(connection, ServerEvent::MessageStatus(update));
    }

    /// Bind `request.username` to `connection`.
    ///
    /// Emits `registered`, broadcasts the online set, then hands over any
    /// queued messages. Returns the bound username.
    pub async fn register(
        &self,
        connection: ConnectionId,
        request: Register,
    ) -> ProtocolResult<Username> {
        let username = request.username;
        let stored = match self.directory.lookup(&username).await {
            Ok(key) => key,
            Err(DirectoryError::NotFound(_)) => return Err(ProtocolError::UnknownUser(username)),
            Err(e) => {
                tracing::error!("directory lookup for {} failed: {}", username, e);
                return Err(ProtocolError::Internal(e.to_string()));
            }
        };

        if let Some(claimed) = request.public_key {
            let claimed = STANDARD
                .decode(claimed.trim())
                .map_err(|_| ProtocolError::InvalidMessage {
                    reason: "publicKey is not base64".to_string(),
                })?;
            if claimed != stored {
                tracing::warn!("key mismatch registering {}", username);
                return Err(ProtocolError::KeyMismatch(username));
            }
        }

        if let Some(previous) = self.presence.register(&username, connection).await {
            tracing::info!(
                "{} moved from {:?} to {:?}",
                username,
                previous,
                connection
            );
            self.connections
                .send(previous, ServerEvent::error(REASON_SUPERSEDED));
            // Dropping the sender flushes the notice and ends the old writer.
            self.connections.close(previous);
        }
        RelayMetrics::bump(&self.metrics.registrations_total);
        tracing::info!("{} registered on {:?}", username, connection);

        self.connections.send(
            connection,
            ServerEvent::Registered(Registered {
                username: username.clone(),
            }),
        );
        self.broadcast_online_users().await;
        self.deliver_queued(&username, connection).await;
        Ok(username)
    }

    async fn deliver_queued(&self, recipient: &Username, connection: ConnectionId) {
        let drained = match self.queue.drain(recipient).await {
            Ok(drained) => drained,
            Err(e) => {
                tracing::error!("draining queue for {} failed: {}", recipient, e);
                return;
            }
        };
        if drained.is_empty() {
            return;
        }
        tracing::debug!("delivering {} queued messages to {}", drained.len(), recipient);

        let mut remaining = drained.into_iter();
        while let Some(queued) = remaining.next() {
            let (id, sender) = (queued.message_id.clone(), queued.sender.clone());
            let delivery = ServerEvent::Message(queued.clone().into_delivery());
            if self.connections.send(connection, delivery) {
                RelayMetrics::bump(&self.metrics.messages_drained);
                self.lock_receipts().record(id, sender, recipient.clone());
                continue;
            }

            // The recipient vanished mid-drain: put the rest back.
            tracing::debug!("{} went away during drain, re-queueing", recipient);
            for message in std::iter::once(queued).chain(remaining.by_ref()) {
                if let Err(e) = self.queue.enqueue(&message).await {
                    tracing::error!(
                        "re-queueing {} for {} failed: {}",
                        message.message_id,
                        recipient,
                        e
                    );
                }
            }
            break;
        }
    }

    /// Validate and route a direct message from `sender` on `from`.
    ///
    /// Returns an error only for malformed or rate-limited events; routing
    /// outcomes are reported to the sender as `messageStatus`.
    pub async fn route_message(
        &self,
        from: ConnectionId,
        sender: &Username,
        message: OutgoingMessage,
    ) -> ProtocolResult<()> {
        let size = self.check_envelope(&message.encrypted_content)?;
        if let Some(timer) = message.timer {
            let limit = self.config.messaging.max_timer_secs;
            if timer > limit {
                return Err(ProtocolError::TimerTooLong { timer, limit });
            }
        }
        self.check_send_quota(sender)?;
        self.metrics
            .bytes_relayed
            .fetch_add(size as u64, Ordering::Relaxed);

        let id = message.message_id.clone();
        match self.directory.lookup(&message.recipient).await {
            Ok(_) => {}
            Err(DirectoryError::NotFound(_)) => {
                tracing::debug!("{} -> {}: unknown recipient", sender, message.recipient);
                self.ack(from, StatusUpdate::failed(id, REASON_UNKNOWN_USER));
                return Ok(());
            }
            Err(e) => {
                tracing::error!("directory lookup for {} failed: {}", message.recipient, e);
                self.ack(from, StatusUpdate::failed(id, REASON_INTERNAL));
                return Ok(());
            }
        }

        // Resolve presence after the directory await, right before forwarding.
        if let Some(connection) = self.presence.connection_of(&message.recipient).await {
            let delivery = ServerEvent::Message(IncomingMessage {
                sender: sender.clone(),
                encrypted_content: message.encrypted_content.clone(),
                timer: message.timer,
                message_id: id.clone(),
                status: MessageStatus::Delivered,
            });
            if self.connections.send(connection, delivery) {
                RelayMetrics::bump(&self.metrics.messages_delivered);
                self.lock_receipts()
                    .record(id.clone(), sender.clone(), message.recipient.clone());
                self.ack(from, StatusUpdate::new(id, MessageStatus::Delivered));
                return Ok(());
            }
            tracing::debug!("{} vanished before delivery, treating as offline", message.recipient);
        }

        let allow_queue = message
            .allow_queue
            .unwrap_or(self.config.messaging.queue_by_default);
        if !allow_queue {
            self.ack(from, StatusUpdate::failed(id, REASON_OFFLINE));
            return Ok(());
        }

        let queued = QueuedMessage {
            sender: sender.clone(),
            recipient: message.recipient,
            message_id: id.clone(),
            encrypted_content: message.encrypted_content,
            timer: message.timer,
            enqueued_at: current_timestamp(),
        };
        match self.queue.enqueue(&queued).await {
            Ok(()) => {
                RelayMetrics::bump(&self.metrics.messages_queued);
                self.ack(from, StatusUpdate::new(id, MessageStatus::Queued));
                // The recipient may have registered and drained while we were
                // storing; flush now instead of waiting for the next connect.
                if let Some(connection) = self.presence.connection_of(&queued.recipient).await {
                    tracing::debug!("{} came online during enqueue", queued.recipient);
                    self.deliver_queued(&queued.recipient, connection).await;
                }
            }
            Err(StorageError::QueueFull { .. }) => {
                tracing::warn!("queue for {} is full", queued.recipient);
                self.ack(from, StatusUpdate::failed(id, REASON_QUEUE_FULL));
            }
            Err(e) => {
                tracing::error!("enqueue for {} failed: {}", queued.recipient, e);
                self.ack(from, StatusUpdate::failed(id, REASON_INTERNAL));
            }
        }
        Ok(())
    }

    /// Decode an envelope and enforce the size limit. Returns its size.
    fn check_envelope(&self, encoded: &str) -> ProtocolResult<usize> {
        let size = Envelope::from_base64(encoded)?.len();
        let limit = self.config.limits.max_message_bytes;
        if size > limit {
            return Err(ProtocolError::MessageTooLarge { size, limit });
        }
        Ok(size)
    }

    fn check_send_quota(&self, sender: &Username) -> ProtocolResult<()> {
        let checked = self
            .rate_limits
            .check_global()
            .and_then(|()| self.rate_limits.check_message(sender));
        if let Err(e) = checked {
            tracing::warn!("rate limited {}: {}", sender, e);
            RelayMetrics::bump(&self.metrics.rate_limit_hits);
            return Err(ProtocolError::RateLimited);
        }
        Ok(())
    }

    /// Forward a read receipt from `reader` to the original sender.
    ///
    /// Best effort: unknown IDs, readers who weren't the recipient, and
    /// offline senders are all dropped.
    pub async fn mark_read(&self, reader: &Username, receipt: MessageRead) {
        let Some(sender) = self.lock_receipts().take_for(&receipt.message_id, reader) else {
            tracing::debug!("ignoring read receipt {} from {}", receipt.message_id, reader);
            return;
        };
        if let Some(connection) = self.presence.connection_of(&sender).await {
            let update = StatusUpdate::new(receipt.message_id, MessageStatus::Read);
            if self
                .connections
                .send(connection, ServerEvent::MessageStatus(update))
            {
                RelayMetrics::bump(&self.metrics.receipts_forwarded);
            }
        }
    }

    /// Relay a typing notice, throttled per sender.
    pub async fn typing_notice(&self, sender: &Username, notice: TypingNotice) {
        let forward = self.rate_limits.allow_typing(sender);
        if forward {
            RelayMetrics::bump(&self.metrics.typing_forwarded);
        }
        self.typing
            .on_typing(sender, &notice.recipient, forward)
            .await;
    }

    /// Join a legacy room.
    pub fn join_room(&self, connection: ConnectionId, request: JoinRoom) -> ProtocolResult<()> {
        self.check_global_quota()?;
        let deliveries = self.rooms.join(connection, request)?;
        self.dispatch(deliveries);
        Ok(())
    }

    /// Leave a legacy room.
    pub fn leave_room(&self, connection: ConnectionId, room_name: &str) -> ProtocolResult<()> {
        let deliveries = self.rooms.leave(connection, room_name)?;
        self.dispatch(deliveries);
        Ok(())
    }

    /// Post to a legacy room.
    ///
    /// Every per-member envelope is size checked, and the post counts once
    /// against the sender's message quota.
    pub fn post_to_room(&self, connection: ConnectionId, post: RoomPost) -> ProtocolResult<()> {
        let sender = self.rooms.member_name(connection, &post.room_name)?;
        let mut size = 0;
        for envelope in post.ciphertexts.values() {
            size += self.check_envelope(envelope)?;
        }
        self.check_send_quota(&sender)?;
        self.metrics
            .bytes_relayed
            .fetch_add(size as u64, Ordering::Relaxed);
        let deliveries = self.rooms.post(connection, post)?;
        self.dispatch(deliveries);
        Ok(())
    }

    fn check_global_quota(&self) -> ProtocolResult<()> {
        if self.rate_limits.check_global().is_err() {
            RelayMetrics::bump(&self.metrics.rate_limit_hits);
            return Err(ProtocolError::RateLimited);
        }
        Ok(())
    }

    /// Tear down everything tied to `connection`.
    pub async fn disconnect(&self, connection: ConnectionId, username: Option<&Username>) {
        self.connections.close(connection);
        let deliveries = self.rooms.leave_all(connection);
        self.dispatch(deliveries);

        if let Some(username) = username {
            // A superseded connection must not evict its replacement.
            if self.presence.unregister(username, connection).await {
                tracing::info!("{} disconnected", username);
                self.typing.clear(username).await;
                self.broadcast_online_users().await;
            }
        }
    }

    /// Send the current online set to every online user.
    pub async fn broadcast_online_users(&self) {
        let users = self.presence.online_users().await;
        for (_, connection) in self.presence.online_sessions().await {
            self.connections
                .send(connection, ServerEvent::OnlineUsers(users.clone()));
        }
    }

    /// Report a protocol error to `connection`.
    pub fn report_error(&self, connection: ConnectionId, error: &ProtocolError) {
        RelayMetrics::bump(&self.metrics.errors_total);
        self.connections
            .send(connection, ServerEvent::error(error.client_message()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    fn envelope() -> String {
        Envelope::new([1u8; 24], vec![2u8; 32]).to_base64()
    }

    async fn relay_with(names: &[&str]) -> ChatRelay {
        let storage = Arc::new(MemoryStorage::new());
        for (i, name) in names.iter().enumerate() {
            storage.register(&user(name), &[i as u8 + 1; 32]).await.unwrap();
        }
        ChatRelay::with_storage(Config::default(), storage)
    }

    fn register_request(name: &str) -> Register {
        Register {
            username: user(name),
            public_key: None,
        }
    }

    fn outgoing(to: &str, id: &str) -> OutgoingMessage {
        OutgoingMessage {
            recipient: user(to),
            encrypted_content: envelope(),
            timer: None,
            message_id: MessageId::parse(id).unwrap(),
            allow_queue: None,
        }
    }

    fn drain(rx: &mut Inbound) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[ServerEvent]) -> Vec<(MessageStatus, Option<String>)> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::MessageStatus(u) => Some((u.status, u.reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Queue whose `enqueue` parks until the test releases it.
    struct GatedQueue {
        inner: MemoryStorage,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl OfflineQueue for GatedQueue {
        async fn enqueue(&self, message: &QueuedMessage) -> Result<(), StorageError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.enqueue(message).await
        }

        async fn drain(&self, recipient: &Username) -> Result<Vec<QueuedMessage>, StorageError> {
            self.inner.drain(recipient).await
        }

        async fn pending_count(&self, recipient: &Username) -> Result<u64, StorageError> {
            self.inner.pending_count(recipient).await
        }

        async fn cleanup_expired(&self) -> Result<u64, StorageError> {
            self.inner.cleanup_expired().await
        }
    }

    #[tokio::test]
    async fn recipient_registering_during_enqueue_still_gets_message() {
        let directory = Arc::new(MemoryStorage::new());
        directory.register(&user("alice"), &[1u8; 32]).await.unwrap();
        directory.register(&user("bob"), &[2u8; 32]).await.unwrap();
        let queue = Arc::new(GatedQueue {
            inner: MemoryStorage::new(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let relay = Arc::new(ChatRelay::new(
            Config::default(),
            directory,
            queue.clone(),
        ));
        let (a, _a_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();

        let sending = tokio::spawn({
            let relay = relay.clone();
            async move {
                relay
                    .route_message(a, &user("alice"), outgoing("bob", "m1"))
                    .await
            }
        });
        queue.entered.notified().await;

        let (b, mut b_rx) = relay.open_connection();
        relay.register(b, register_request("bob")).await.unwrap();
        queue.release.notify_one();
        sending.await.unwrap().unwrap();

        let received: Vec<_> = drain(&mut b_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].status, MessageStatus::Received);
        assert_eq!(relay.queue().pending_count(&user("bob")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn room_posts_are_size_checked_and_rate_limited_per_sender() {
        let mut config = Config::default();
        config.limits.max_message_bytes = 64;
        config.limits.messages_per_minute = 1;
        let relay = ChatRelay::with_storage(config, Arc::new(MemoryStorage::new()));
        let (ann, _ann_rx) = relay.open_connection();
        let (ben, mut ben_rx) = relay.open_connection();
        for (conn, name) in [(ann, "ann"), (ben, "ben")] {
            relay
                .join_room(
                    conn,
                    JoinRoom {
                        room_name: "ops".into(),
                        password: "pw".into(),
                        username: user(name),
                        public_key: format!("{name}-key"),
                    },
                )
                .unwrap();
        }
        drain(&mut ben_rx);

        let post = |id: &str, body: usize| RoomPost {
            room_name: "ops".into(),
            message_id: MessageId::parse(id).unwrap(),
            ciphertexts: [(
                user("ben"),
                Envelope::new([1u8; 24], vec![2u8; body]).to_base64(),
            )]
            .into_iter()
            .collect(),
        };

        assert!(matches!(
            relay.post_to_room(ann, post("big", 128)),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
        relay.post_to_room(ann, post("r1", 16)).unwrap();
        assert!(matches!(
            relay.post_to_room(ann, post("r2", 16)),
            Err(ProtocolError::RateLimited)
        ));
        // Ben's quota is his own.
        relay.post_to_room(ben, post("r3", 16)).unwrap();

        let delivered: Vec<_> = drain(&mut ben_rx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::RoomMessage(_)))
            .collect();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn register_unknown_user_fails() {
        let relay = relay_with(&[]).await;
        let (conn, _rx) = relay.open_connection();

        let err = relay.register(conn, register_request("ghost")).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownUser(_)));
        assert!(!relay.presence().is_online(&user("ghost")).await);
    }

    #[tokio::test]
    async fn register_checks_claimed_key() {
        let relay = relay_with(&["alice"]).await;
        let (conn, _rx) = relay.open_connection();

        let wrong = Register {
            username: user("alice"),
            public_key: Some(STANDARD.encode([9u8; 32])),
        };
        assert!(matches!(
            relay.register(conn, wrong).await,
            Err(ProtocolError::KeyMismatch(_))
        ));

        let right = Register {
            username: user("alice"),
            public_key: Some(STANDARD.encode([1u8; 32])),
        };
        assert_eq!(relay.register(conn, right).await.unwrap(), user("alice"));
    }

    #[tokio::test]
    async fn register_emits_registered_then_online_users() {
        let relay = relay_with(&["alice"]).await;
        let (conn, mut rx) = relay.open_connection();

        relay.register(conn, register_request("alice")).await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], ServerEvent::Registered(_)));
        assert_eq!(events[1], ServerEvent::OnlineUsers(vec![user("alice")]));
    }

    #[tokio::test]
    async fn online_recipient_gets_identical_envelope() {
        let relay = relay_with(&["alice", "bob"]).await;
        let (a, mut a_rx) = relay.open_connection();
        let (b, mut b_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();
        relay.register(b, register_request("bob")).await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let msg = outgoing("bob", "m1");
        relay.route_message(a, &user("alice"), msg.clone()).await.unwrap();

        assert_eq!(
            statuses(&drain(&mut a_rx)),
            vec![(MessageStatus::Delivered, None)]
        );
        match &drain(&mut b_rx)[..] {
            [ServerEvent::Message(incoming)] => {
                assert_eq!(incoming.encrypted_content, msg.encrypted_content);
                assert_eq!(incoming.sender, user("alice"));
                assert_eq!(incoming.status, MessageStatus::Delivered);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_recipient_is_failed_not_queued() {
        let relay = relay_with(&["alice"]).await;
        let (a, mut a_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();
        drain(&mut a_rx);

        relay
            .route_message(a, &user("alice"), outgoing("ghost", "m1"))
            .await
            .unwrap();

        assert_eq!(
            statuses(&drain(&mut a_rx)),
            vec![(MessageStatus::Failed, Some(REASON_UNKNOWN_USER.to_string()))]
        );
        assert_eq!(relay.queue().pending_count(&user("ghost")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_recipient_is_queued_then_drained_as_received() {
        let relay = relay_with(&["alice", "bob"]).await;
        let (a, mut a_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();
        drain(&mut a_rx);

        relay
            .route_message(a, &user("alice"), outgoing("bob", "m1"))
            .await
            .unwrap();
        assert_eq!(
            statuses(&drain(&mut a_rx)),
            vec![(MessageStatus::Queued, None)]
        );

        let (b, mut b_rx) = relay.open_connection();
        relay.register(b, register_request("bob")).await.unwrap();
        let delivered: Vec<_> = drain(&mut b_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].status, MessageStatus::Received);
        assert_eq!(relay.queue().pending_count(&user("bob")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_without_queueing_fails() {
        let relay = relay_with(&["alice", "bob"]).await;
        let (a, mut a_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();
        drain(&mut a_rx);

        let mut msg = outgoing("bob", "m1");
        msg.allow_queue = Some(false);
        relay.route_message(a, &user("alice"), msg).await.unwrap();

        assert_eq!(
            statuses(&drain(&mut a_rx)),
            vec![(MessageStatus::Failed, Some(REASON_OFFLINE.to_string()))]
        );
    }

    #[tokio::test]
    async fn malformed_envelope_is_error_without_status() {
        let relay = relay_with(&["alice", "bob"]).await;
        let (a, mut a_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();
        drain(&mut a_rx);

        let mut msg = outgoing("bob", "m1");
        msg.encrypted_content = STANDARD.encode([0u8; 10]);
        let err = relay.route_message(a, &user("alice"), msg).await.unwrap_err();

        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(statuses(&drain(&mut a_rx)).is_empty());
    }

    #[tokio::test]
    async fn oversized_envelope_and_long_timer_rejected() {
        let mut config = Config::default();
        config.limits.max_message_bytes = 48;
        config.messaging.max_timer_secs = 60;
        let storage = Arc::new(MemoryStorage::new());
        let relay = ChatRelay::with_storage(config, storage);
        let (a, _rx) = relay.open_connection();

        let mut big = outgoing("bob", "m1");
        big.encrypted_content = Envelope::new([0u8; 24], vec![0u8; 100]).to_base64();
        assert!(matches!(
            relay.route_message(a, &user("alice"), big).await,
            Err(ProtocolError::MessageTooLarge { limit: 48, .. })
        ));

        let mut timed = outgoing("bob", "m2");
        timed.encrypted_content = Envelope::new([0u8; 24], vec![0u8; 16]).to_base64();
        timed.timer = Some(61);
        assert!(matches!(
            relay.route_message(a, &user("alice"), timed).await,
            Err(ProtocolError::TimerTooLong { timer: 61, .. })
        ));
    }

    #[tokio::test]
    async fn read_receipt_reaches_sender_only_from_recipient() {
        let relay = relay_with(&["alice", "bob", "carol"]).await;
        let (a, mut a_rx) = relay.open_connection();
        let (b, mut b_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();
        relay.register(b, register_request("bob")).await.unwrap();
        relay
            .route_message(a, &user("alice"), outgoing("bob", "m1"))
            .await
            .unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let receipt = MessageRead {
            message_id: MessageId::parse("m1").unwrap(),
        };
        relay.mark_read(&user("carol"), receipt.clone()).await;
        assert!(drain(&mut a_rx).is_empty());

        relay.mark_read(&user("bob"), receipt.clone()).await;
        assert_eq!(
            statuses(&drain(&mut a_rx)),
            vec![(MessageStatus::Read, None)]
        );

        // Read is terminal; a repeat receipt is dropped.
        relay.mark_read(&user("bob"), receipt).await;
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn stale_disconnect_keeps_new_session() {
        let relay = relay_with(&["alice"]).await;
        let (old, mut old_rx) = relay.open_connection();
        let (new, _new_rx) = relay.open_connection();
        relay.register(old, register_request("alice")).await.unwrap();
        relay.register(new, register_request("alice")).await.unwrap();

        assert!(drain(&mut old_rx).contains(&ServerEvent::error(REASON_SUPERSEDED)));
        assert!(matches!(
            old_rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));

        relay.disconnect(old, Some(&user("alice"))).await;

        assert_eq!(
            relay.presence().connection_of(&user("alice")).await,
            Some(new)
        );
    }

    #[tokio::test]
    async fn disconnect_broadcasts_online_set() {
        let relay = relay_with(&["alice", "bob"]).await;
        let (a, mut a_rx) = relay.open_connection();
        let (b, _b_rx) = relay.open_connection();
        relay.register(a, register_request("alice")).await.unwrap();
        relay.register(b, register_request("bob")).await.unwrap();
        drain(&mut a_rx);

        relay.disconnect(b, Some(&user("bob"))).await;

        assert_eq!(
            drain(&mut a_rx),
            vec![ServerEvent::OnlineUsers(vec![user("alice")])]
        );
        assert_eq!(relay.total_sessions(), 1);
    }

    #[test]
    fn receipt_ledger_is_bounded() {
        let mut ledger = ReceiptLedger::new(2);
        for id in ["m1", "m2", "m3"] {
            ledger.record(MessageId::parse(id).unwrap(), user("alice"), user("bob"));
        }
        assert_eq!(ledger.len(), 2);
        assert!(ledger
            .take_for(&MessageId::parse("m1").unwrap(), &user("bob"))
            .is_none());
        assert_eq!(
            ledger.take_for(&MessageId::parse("m3").unwrap(), &user("bob")),
            Some(user("alice"))
        );
    }
}
