//! # chat-types
//!
//! Wire format types for the veilchat end-to-end encrypted relay protocol.
//!
//! This crate provides the foundational types used across all veilchat crates:
//! - [`Username`], [`MessageId`], [`ConnectionId`] - Identity types
//! - [`Envelope`] - Encrypted payload (`nonce ‖ ciphertext`) as carried on the wire
//! - [`MessageStatus`] - Delivery state of a direct message
//! - [`ClientEvent`], [`ServerEvent`] - Realtime JSON events
//! - [`ChatError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;
mod status;

pub use envelope::{Envelope, MIN_ENVELOPE_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::ChatError;
pub use ids::{ConnectionId, MessageId, Username, MAX_MESSAGE_ID_LEN, MAX_USERNAME_LEN};
pub use messages::{
    ClientEvent, IncomingMessage, JoinRoom, LeaveRoom, MessageRead, OutgoingMessage, PeerJoined,
    PeerLeft, Register, Registered, RoomJoined, RoomMember, RoomMessage, RoomPost, ServerEvent,
    StatusUpdate, TypingNotice, TypingUpdate,
};
pub use status::MessageStatus;
