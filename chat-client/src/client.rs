//! ChatClient - the main interface for veilchat.
//!
//! # Architecture
//!
//! ChatClient uses the pure state machines from chat-core for connection,
//! delivery, dedup, and typing logic, and performs the actual I/O through the
//! [`Transport`] trait.
//!
//! ```text
//! Application → ChatClient → Transport → Relay
//!                   ↓
//!              chat-core (pure state machines)
//! ```
//!
//! Every inbound frame goes through [`ChatClient::handle_frame`], the single
//! handler for the connection. Reconnecting does not add handlers, and the
//! `register` event is sent exactly once per transport connection.
//!
//! # Example
//!
//! ```ignore
//! use chat_client::{ChatClient, ClientConfig, KeyPair, WsTransport};
//!
//! let config = ClientConfig::new("ws://127.0.0.1:8080/ws", alice, KeyPair::generate()?);
//! let client = ChatClient::new(config, WsTransport::new());
//! client.connect().await?;
//! client.add_contact(bob.clone(), bob_public_key).await;
//! client.send_message(&bob, b"hi bob", None).await?;
//! while let Ok(event) = client.next_event().await { /* render */ }
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chat_core::{
    Action, ConnectionEvent, ConnectionState, DedupTracker, DeliveryLedger, Event, ExpiryQueue,
    Transition, TypingDebouncer, TypingIndicators,
};
use chat_types::{
    ChatError, ClientEvent, IncomingMessage, JoinRoom, LeaveRoom, MessageId, MessageRead,
    MessageStatus, OutgoingMessage, Register, RoomMember, RoomPost, ServerEvent, TypingNotice,
    Username,
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::crypto::{CryptoError, KeyPair, PublicKey};
use crate::transport::{Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Wire format error.
    #[error("wire error: {0}")]
    Wire(#[from] ChatError),

    /// Not registered with the relay.
    #[error("not connected")]
    NotConnected,

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Relay rejected the registration.
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    /// No public key known for this peer.
    #[error("no public key for {0}")]
    UnknownContact(Username),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Configuration for ChatClient.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the relay, e.g. `ws://host:8080/ws`.
    pub relay_url: String,
    /// Our registered username.
    pub username: Username,
    /// Our identity key pair.
    pub key_pair: KeyPair,
    /// Ask the relay to queue messages for offline recipients.
    pub queue_if_offline: bool,
    /// How many inbound message IDs to remember for dedup.
    pub dedup_capacity: usize,
    /// How many outgoing message statuses to track.
    pub ledger_capacity: usize,
}

impl ClientConfig {
    /// Create a configuration with default queueing and capacities.
    pub fn new(relay_url: &str, username: Username, key_pair: KeyPair) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            username,
            key_pair,
            queue_if_offline: true,
            dedup_capacity: chat_core::DEFAULT_DEDUP_CAPACITY,
            ledger_capacity: 4096,
        }
    }

    /// Set whether offline recipients get queued messages.
    pub fn with_queueing(mut self, enabled: bool) -> Self {
        self.queue_if_offline = enabled;
        self
    }
}

/// A direct message as delivered to the application.
#[derive(Clone)]
pub struct ReceivedMessage {
    /// Sender-generated message ID.
    pub message_id: MessageId,
    /// Who sent it.
    pub sender: Username,
    /// Decrypted body; `None` when decryption failed.
    pub plaintext: Option<Vec<u8>>,
    /// Self-destruct timer in seconds.
    pub timer: Option<u32>,
    /// `delivered`, `received` (from the offline queue), or `failed`.
    pub status: MessageStatus,
}

impl std::fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("message_id", &self.message_id)
            .field("sender", &self.sender)
            .field(
                "plaintext",
                &self
                    .plaintext
                    .as_ref()
                    .map(|p| format!("[{} bytes REDACTED]", p.len())),
            )
            .field("timer", &self.timer)
            .field("status", &self.status)
            .finish()
    }
}

/// Events surfaced to the application.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Connection lifecycle change.
    Connection(ConnectionEvent),
    /// A new direct message.
    Message(ReceivedMessage),
    /// A message we sent changed status.
    StatusChanged {
        /// Message ID.
        message_id: MessageId,
        /// New status.
        status: MessageStatus,
        /// Failure reason, if any.
        reason: Option<String>,
    },
    /// A peer started or stopped typing.
    Typing {
        /// The peer.
        sender: Username,
        /// Whether they are typing now.
        is_typing: bool,
    },
    /// Current online set.
    OnlineUsers(Vec<Username>),
    /// Error reported by the relay.
    ServerError(String),
    /// Room notification (legacy room mode).
    Room(ServerEvent),
}

#[derive(Debug)]
struct ClientState {
    connection: ConnectionState,
    next_retry: Option<Duration>,
    contacts: HashMap<Username, PublicKey>,
    dedup: DedupTracker,
    ledger: DeliveryLedger,
    debounce: TypingDebouncer,
    typing: TypingIndicators,
    expiry: ExpiryQueue,
}

/// The main chat client.
pub struct ChatClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    state: Mutex<ClientState>,
}

impl<T: Transport> ChatClient<T> {
    /// Create a new ChatClient.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let state = ClientState {
            connection: ConnectionState::new(),
            next_retry: None,
            contacts: HashMap::new(),
            dedup: DedupTracker::new(config.dedup_capacity),
            ledger: DeliveryLedger::new(config.ledger_capacity),
            debounce: TypingDebouncer::default(),
            typing: TypingIndicators::default(),
            expiry: ExpiryQueue::new(),
        };
        Self {
            config,
            transport,
            state: Mutex::new(state),
        }
    }

    /// Feed an event to the connection state machine and run its actions.
    ///
    /// Returns the application events the actions produced.
    async fn drive(&self, event: Event) -> Result<Vec<ConnectionEvent>, ClientError> {
        let actions = {
            let mut state = self.state.lock().await;
            let (next, actions) = state.connection.clone().on_event(event);
            state.connection = next;
            actions
        };

        let mut emitted = Vec::new();
        for action in actions {
            match action {
                // Connect is performed by the caller that raised the event.
                Action::Connect => {}
                Action::SendRegister => {
                    let register = ClientEvent::Register(Register {
                        username: self.config.username.clone(),
                        public_key: Some(self.config.key_pair.public().to_base64()),
                    });
                    self.transport.send(&register.to_json()?).await?;
                }
                Action::Disconnect => {
                    self.transport.close().await?;
                }
                Action::StartReconnectTimer { delay } => {
                    self.state.lock().await.next_retry = Some(delay);
                }
                Action::CancelReconnect => {
                    self.state.lock().await.next_retry = None;
                }
                Action::EmitEvent(event) => emitted.push(event),
            }
        }
        Ok(emitted)
    }

    /// Connect to the relay and register.
    ///
    /// Waits for the relay's answer to `register`. Frames arriving after it
    /// (online set, queued messages) are left for [`next_event`](Self::next_event).
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.drive(Event::ConnectRequested).await?;
        self.establish().await
    }

    async fn establish(&self) -> Result<(), ClientError> {
        if let Err(e) = self.transport.connect(&self.config.relay_url).await {
            self.drive(Event::ConnectFailed {
                error: e.to_string(),
            })
            .await?;
            return Err(ClientError::ConnectionFailed(e.to_string()));
        }
        self.drive(Event::ConnectSucceeded).await?;

        let frame = match self.transport.recv().await {
            Ok(frame) => frame,
            Err(e) => {
                self.drive(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await?;
                return Err(e.into());
            }
        };
        match ServerEvent::from_json(&frame)? {
            ServerEvent::Registered(registered) => {
                self.drive(Event::Registered {
                    username: registered.username,
                })
                .await?;
                tracing::debug!("registered as {}", self.config.username);
                Ok(())
            }
            ServerEvent::Error(reason) => {
                self.drive(Event::RegisterFailed {
                    error: reason.clone(),
                })
                .await?;
                Err(ClientError::RegistrationRejected(reason))
            }
            other => Err(ClientError::Protocol(format!(
                "expected registered, got {:?}",
                other
            ))),
        }
    }

    /// Reconnect after a lost connection, retrying until it succeeds.
    ///
    /// Sleeps for the backoff chosen by the state machine between attempts.
    /// Only a rejected registration stops the loop, since retrying it cannot help.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        loop {
            let delay = self.state.lock().await.next_retry.take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.drive(Event::ReconnectTimer).await?;
            match self.establish().await {
                Ok(()) => return Ok(()),
                Err(ClientError::RegistrationRejected(reason)) => {
                    return Err(ClientError::RegistrationRejected(reason))
                }
                Err(e) => {
                    tracing::debug!("reconnect attempt failed: {}", e);
                    if self.state.lock().await.connection.is_connecting() {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Check if registered with the relay.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.is_connected()
    }

    /// Disconnect from the relay.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.drive(Event::DisconnectRequested).await?;
        if self.transport.is_connected() {
            self.transport.close().await?;
        }
        Ok(())
    }

    /// Remember a peer's public key.
    pub async fn add_contact(&self, username: Username, public_key: PublicKey) {
        self.state.lock().await.contacts.insert(username, public_key);
    }

    /// Known public key for a peer.
    pub async fn contact(&self, username: &Username) -> Option<PublicKey> {
        self.state.lock().await.contacts.get(username).copied()
    }

    /// Encrypt and send a direct message. Returns its ID (status `sent`).
    pub async fn send_message(
        &self,
        recipient: &Username,
        plaintext: &[u8],
        timer: Option<u32>,
    ) -> Result<MessageId, ClientError> {
        let (message_id, frame) = {
            let mut state = self.state.lock().await;
            if !state.connection.is_connected() {
                return Err(ClientError::NotConnected);
            }
            let peer = state
                .contacts
                .get(recipient)
                .copied()
                .ok_or_else(|| ClientError::UnknownContact(recipient.clone()))?;

            let encrypted_content = self.config.key_pair.seal_for(&peer, plaintext)?;
            let message_id = MessageId::random();
            let frame = ClientEvent::Message(OutgoingMessage {
                recipient: recipient.clone(),
                encrypted_content,
                timer,
                message_id: message_id.clone(),
                allow_queue: Some(self.config.queue_if_offline),
            })
            .to_json()?;

            state.ledger.record_sent(message_id.clone());
            state.debounce.reset();
            (message_id, frame)
        };

        if let Err(e) = self.transport.send(&frame).await {
            if let Err(ledger) = self
                .state
                .lock()
                .await
                .ledger
                .apply(&message_id, MessageStatus::Failed)
            {
                tracing::debug!("not marking {} failed: {}", message_id, ledger);
            }
            return Err(e.into());
        }
        Ok(message_id)
    }

    /// Tell the sender we read one of their messages.
    pub async fn mark_read(&self, message_id: &MessageId) -> Result<(), ClientError> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }
        let frame = ClientEvent::MessageRead(MessageRead {
            message_id: message_id.clone(),
        })
        .to_json()?;
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Report typing activity; debounced to one event per 500 ms.
    ///
    /// Returns whether an event was actually sent.
    pub async fn notify_typing(&self, recipient: &Username) -> Result<bool, ClientError> {
        {
            let mut state = self.state.lock().await;
            if !state.connection.is_connected() {
                return Err(ClientError::NotConnected);
            }
            if !state.debounce.should_emit(Instant::now()) {
                return Ok(false);
            }
        }
        let frame = ClientEvent::Typing(TypingNotice {
            recipient: recipient.clone(),
        })
        .to_json()?;
        self.transport.send(&frame).await?;
        Ok(true)
    }

    /// Join (or create) a legacy password-gated room.
    pub async fn join_room(&self, room_name: &str, password: &str) -> Result<(), ClientError> {
        let frame = ClientEvent::JoinRoom(JoinRoom {
            room_name: room_name.to_string(),
            password: password.to_string(),
            username: self.config.username.clone(),
            public_key: self.config.key_pair.public().to_base64(),
        })
        .to_json()?;
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Leave a legacy room.
    pub async fn leave_room(&self, room_name: &str) -> Result<(), ClientError> {
        let frame = ClientEvent::LeaveRoom(LeaveRoom {
            room_name: room_name.to_string(),
        })
        .to_json()?;
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Seal `plaintext` once per room member and post it to the room.
    pub async fn post_to_room(
        &self,
        room_name: &str,
        members: &[RoomMember],
        plaintext: &[u8],
    ) -> Result<MessageId, ClientError> {
        let mut ciphertexts = std::collections::BTreeMap::new();
        for member in members {
            let key = PublicKey::from_base64(&member.public_key)?;
            ciphertexts.insert(
                member.username.clone(),
                self.config.key_pair.seal_for(&key, plaintext)?,
            );
        }
        let message_id = MessageId::random();
        let frame = ClientEvent::RoomMessage(RoomPost {
            room_name: room_name.to_string(),
            message_id: message_id.clone(),
            ciphertexts,
        })
        .to_json()?;
        self.transport.send(&frame).await?;
        Ok(message_id)
    }

    /// Open a room message addressed to us, sealed by `sender_key`.
    pub fn open_room_message(
        &self,
        sender_key: &PublicKey,
        encrypted_content: &str,
    ) -> Result<Vec<u8>, ClientError> {
        Ok(self.config.key_pair.open_from(sender_key, encrypted_content)?)
    }

    /// Wait for the next application event.
    ///
    /// Duplicate deliveries and stale status updates are swallowed. A lost
    /// connection is reported as [`ConnectionEvent::Disconnected`]; call
    /// [`reconnect`](Self::reconnect) afterwards.
    pub async fn next_event(&self) -> Result<ChatEvent, ClientError> {
        loop {
            let frame = match self.transport.recv().await {
                Ok(frame) => frame,
                Err(e) => {
                    let emitted = self
                        .drive(Event::Disconnected {
                            reason: e.to_string(),
                        })
                        .await?;
                    return match emitted.into_iter().next() {
                        Some(event) => Ok(ChatEvent::Connection(event)),
                        None => Err(e.into()),
                    };
                }
            };
            if let Some(event) = self.handle_frame(&frame).await? {
                return Ok(event);
            }
        }
    }

    /// Process one inbound frame.
    ///
    /// Returns `None` for frames with nothing to surface (duplicates, stale
    /// statuses).
    pub async fn handle_frame(&self, frame: &str) -> Result<Option<ChatEvent>, ClientError> {
        let event = ServerEvent::from_json(frame)?;
        match event {
            ServerEvent::Registered(registered) => {
                let emitted = self
                    .drive(Event::Registered {
                        username: registered.username,
                    })
                    .await?;
                Ok(emitted.into_iter().next().map(ChatEvent::Connection))
            }
            ServerEvent::Message(message) => Ok(self.receive_message(message).await),
            ServerEvent::MessageStatus(update) => {
                let mut state = self.state.lock().await;
                match state.ledger.apply(&update.message_id, update.status) {
                    Ok(Transition::Advanced { to, .. }) => Ok(Some(ChatEvent::StatusChanged {
                        message_id: update.message_id,
                        status: to,
                        reason: update.reason,
                    })),
                    Ok(Transition::Ignored { .. }) => Ok(None),
                    Err(e) => {
                        tracing::debug!("ignoring status update: {}", e);
                        Ok(None)
                    }
                }
            }
            ServerEvent::Typing(update) => {
                self.state.lock().await.typing.on_update(
                    update.sender.clone(),
                    update.is_typing,
                    Instant::now(),
                );
                Ok(Some(ChatEvent::Typing {
                    sender: update.sender,
                    is_typing: update.is_typing,
                }))
            }
            ServerEvent::OnlineUsers(users) => Ok(Some(ChatEvent::OnlineUsers(users))),
            ServerEvent::Error(reason) => {
                let registering = matches!(
                    self.state.lock().await.connection,
                    ConnectionState::Registering
                );
                if registering {
                    let emitted = self
                        .drive(Event::RegisterFailed {
                            error: reason.clone(),
                        })
                        .await?;
                    if let Some(event) = emitted.into_iter().last() {
                        return Ok(Some(ChatEvent::Connection(event)));
                    }
                }
                Ok(Some(ChatEvent::ServerError(reason)))
            }
            room @ (ServerEvent::RoomJoined(_)
            | ServerEvent::PeerJoined(_)
            | ServerEvent::PeerLeft(_)
            | ServerEvent::RoomMessage(_)) => Ok(Some(ChatEvent::Room(room))),
        }
    }

    async fn receive_message(&self, message: IncomingMessage) -> Option<ChatEvent> {
        let mut state = self.state.lock().await;
        if !state.dedup.observe(&message.message_id) {
            tracing::debug!("dropping duplicate {}", message.message_id);
            return None;
        }
        state.typing.clear(&message.sender);

        let opened = match state.contacts.get(&message.sender) {
            Some(sender_key) => self
                .config
                .key_pair
                .open_from(sender_key, &message.encrypted_content)
                .map_err(|e| e.to_string()),
            None => Err(format!("no public key for {}", message.sender)),
        };

        let (plaintext, status) = match opened {
            Ok(plaintext) => (Some(plaintext), message.status),
            Err(reason) => {
                tracing::warn!(
                    "could not open {} from {}: {}",
                    message.message_id,
                    message.sender,
                    reason
                );
                (None, MessageStatus::Failed)
            }
        };

        if let (Some(timer), Some(_)) = (message.timer, plaintext.as_ref()) {
            state
                .expiry
                .schedule(message.message_id.clone(), timer, Instant::now());
        }

        Some(ChatEvent::Message(ReceivedMessage {
            message_id: message.message_id,
            sender: message.sender,
            plaintext,
            timer: message.timer,
            status,
        }))
    }

    /// Messages whose self-destruct timer has run out; the caller deletes them.
    pub async fn expired_messages(&self) -> Vec<MessageId> {
        self.state.lock().await.expiry.due(Instant::now())
    }

    /// Peers currently shown as typing.
    pub async fn typing_peers(&self) -> Vec<Username> {
        self.state.lock().await.typing.active(Instant::now())
    }

    /// Status of a message we sent.
    pub async fn message_status(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.state.lock().await.ledger.status(message_id)
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
