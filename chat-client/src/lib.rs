//! # chat-client
//!
//! Client library for veilchat, an end-to-end encrypted chat relay.
//!
//! The relay only ever sees ciphertext: messages are sealed with a key agreed
//! between the two users' X25519 identities before they leave the device.
//!
//! ## Features
//!
//! - **E2E Encryption**: X25519 + HKDF-SHA256 + XChaCha20-Poly1305
//! - **Delivery Receipts**: monotonic `sent → delivered → read` tracking
//! - **Reconnection**: capped exponential backoff, one `register` per connection
//! - **Transport Abstraction**: WebSocket in production, mock in tests
//! - **Pure State Machine**: Uses chat-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use chat_client::{ChatClient, ClientConfig, KeyPair, WsTransport};
//!
//! let keys = KeyPair::generate()?;
//! let config = ClientConfig::new("ws://127.0.0.1:8080/ws", alice, keys);
//! let client = ChatClient::new(config, WsTransport::new());
//! client.connect().await?;
//!
//! client.add_contact(bob.clone(), bob_key).await;
//! client.send_message(&bob, b"hi bob", None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod crypto;
pub mod transport;

pub use client::{ChatClient, ChatEvent, ClientConfig, ClientError, ReceivedMessage};
pub use crypto::{
    decrypt, encrypt, fingerprint, CryptoError, KeyPair, PublicKey, SecretKey, SharedKey,
    KEY_SIZE, NONCE_SIZE,
};
pub use transport::{MockTransport, Transport, TransportError, WsTransport, MAX_FRAME_SIZE};
