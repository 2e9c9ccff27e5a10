//! Transport abstraction for the chat client.
//!
//! The relay speaks JSON text frames over a WebSocket. This trait hides the
//! socket so the client can be driven by [`MockTransport`] in tests.
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one text frame
//! - `recv()` waits for the next text frame
//! - `close()` gracefully terminates

mod mock;
mod ws;

pub use mock::MockTransport;
pub use ws::WsTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Largest frame the client will send or accept (256 KiB).
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Transport trait for exchanging JSON text frames with the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the relay at `address` (a `ws://` or `wss://` URL).
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Blocks until a frame is available or the connection closes.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
