//! # veilchat-relay
//!
//! Relay server for veilchat end-to-end encrypted chat.
//!
//! The relay:
//! - Keeps an identity directory binding usernames to X25519 public keys
//! - Routes encrypted envelopes between online users over WebSocket
//! - Queues envelopes for offline recipients (7 day TTL by default)
//! - Forwards delivery/read receipts and typing indicators
//! - Never sees plaintext; envelopes are opaque base64 blobs
//!
//! ## Architecture
//!
//! ```text
//! Alice ──┐                         ┌── Bob
//!         │   WebSocket (JSON)      │
//!         ├────────────────────────►│
//!     ┌───┴─────────────────────────┴───┐
//!     │          veilchat-relay         │
//!     │  presence · rooms · typing      │
//!     │  ┌───────────────────────────┐  │
//!     │  │ SQLite (identities,queue) │  │
//!     │  └───────────────────────────┘  │
//!     └─────────────────────────────────┘
//! ```
//!
//! ## Endpoints
//!
//! - `POST /register`, `GET /username/:username`, `GET /publicKey/:username`
//! - `GET /ws`: realtime events, `{"event": ..., "data": ...}` text frames
//! - `GET /health`, `GET /metrics`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod connections;
pub mod error;
pub mod http;
pub mod limits;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod server;
pub mod session;
pub mod storage;
pub mod typing;
