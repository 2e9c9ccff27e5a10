//! Realtime events exchanged over the relay connection.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`.
//! Payloads are validated while deserializing: a frame that parses into one
//! of these enums carries well-formed usernames and message IDs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ChatError, MessageId, MessageStatus, Username};

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to a registered identity
    Register(Register),
    /// Send an encrypted direct message
    Message(OutgoingMessage),
    /// Report a received message as read
    MessageRead(MessageRead),
    /// Typing activity towards one recipient
    Typing(TypingNotice),
    /// Join (or create) a password-gated room
    JoinRoom(JoinRoom),
    /// Leave a room
    LeaveRoom(LeaveRoom),
    /// Broadcast per-member ciphertexts to a room
    RoomMessage(RoomPost),
}

/// Events the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Registration accepted
    Registered(Registered),
    /// An encrypted direct message for this client
    Message(IncomingMessage),
    /// Delivery status of a message this client sent
    MessageStatus(StatusUpdate),
    /// A peer started or stopped typing
    Typing(TypingUpdate),
    /// Current set of online usernames
    OnlineUsers(Vec<Username>),
    /// Human-readable error for the last request
    Error(String),
    /// Room join accepted, with the members already present
    RoomJoined(RoomJoined),
    /// Another member joined a room this client is in
    PeerJoined(PeerJoined),
    /// A member left a room this client is in
    PeerLeft(PeerLeft),
    /// Room ciphertext addressed to this client
    RoomMessage(RoomMessage),
}

impl ClientEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ChatError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ChatError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Shorthand for a [`ServerEvent::Error`] event.
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(message.into())
    }
}

/// `register` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    /// Identity to bind to this connection
    pub username: Username,
    /// Optional base64 public key; must match the directory when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// `registered` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registered {
    /// Identity now bound to the connection
    pub username: Username,
}

/// Client → relay `message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Recipient username
    pub recipient: Username,
    /// Base64 `nonce ‖ ciphertext`
    pub encrypted_content: String,
    /// Self-destruct timer in seconds, applied by clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<u32>,
    /// Client-generated unique ID
    pub message_id: MessageId,
    /// Queue for an offline recipient; relay default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_queue: Option<bool>,
}

/// Relay → client `message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Sender username
    pub sender: Username,
    /// Untouched base64 envelope from the sender
    pub encrypted_content: String,
    /// Self-destruct timer in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<u32>,
    /// Sender-generated unique ID
    pub message_id: MessageId,
    /// `delivered` for live delivery, `received` when drained from the queue
    pub status: MessageStatus,
}

/// `messageStatus` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// Message this status refers to
    pub message_id: MessageId,
    /// New status
    pub status: MessageStatus,
    /// Failure reason, present for `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusUpdate {
    /// Status without a reason.
    pub fn new(message_id: MessageId, status: MessageStatus) -> Self {
        Self {
            message_id,
            status,
            reason: None,
        }
    }

    /// `failed` status with a reason.
    pub fn failed(message_id: MessageId, reason: impl Into<String>) -> Self {
        Self {
            message_id,
            status: MessageStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// `messageRead` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    /// Message that was read
    pub message_id: MessageId,
}

/// Client → relay `typing` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    /// Who the sender is typing to
    pub recipient: Username,
}

/// Relay → client `typing` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    /// Who is typing
    pub sender: Username,
    /// false once the indicator expires
    pub is_typing: bool,
}

/// `joinRoom` payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    /// Room to join or create
    pub room_name: String,
    /// Shared room password, fixed by the first joiner
    pub password: String,
    /// Declared display identity inside the room
    pub username: Username,
    /// Base64 public key other members encrypt to
    pub public_key: String,
}

impl std::fmt::Debug for JoinRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinRoom")
            .field("room_name", &self.room_name)
            .field("password", &"[REDACTED]")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// `leaveRoom` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    /// Room to leave
    pub room_name: String,
}

/// Client → relay `roomMessage` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPost {
    /// Target room
    pub room_name: String,
    /// Client-generated unique ID
    pub message_id: MessageId,
    /// One envelope per member, keyed by the member's declared username
    pub ciphertexts: BTreeMap<Username, String>,
}

/// A room member as announced to other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    /// Declared username
    pub username: Username,
    /// Base64 public key
    pub public_key: String,
}

/// `roomJoined` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    /// Room that was joined
    pub room_name: String,
    /// Members present before the join
    pub members: Vec<RoomMember>,
}

/// `peerJoined` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoined {
    /// Room the peer joined
    pub room_name: String,
    /// The new member
    pub member: RoomMember,
}

/// `peerLeft` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeft {
    /// Room the peer left
    pub room_name: String,
    /// Declared username of the departed member
    pub username: Username,
}

/// Relay → client `roomMessage` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    /// Room the message was posted to
    pub room_name: String,
    /// Declared username of the poster
    pub sender: Username,
    /// Envelope addressed to this member
    pub encrypted_content: String,
    /// Poster-generated unique ID
    pub message_id: MessageId,
}
