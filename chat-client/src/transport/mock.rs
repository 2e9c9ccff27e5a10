//! Mock transport for testing.
//!
//! Allows queueing inbound frames and capturing sent frames for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the client owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connect_count: usize,
    connected_address: Option<String>,
    sent_frames: Vec<String>,
    receive_queue: VecDeque<String>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a frame to be returned by a later `recv()` call.
    pub fn queue_frame(&self, frame: impl Into<String>) {
        self.lock().receive_queue.push_back(frame.into());
    }

    /// All frames sent so far.
    pub fn sent_frames(&self) -> Vec<String> {
        self.lock().sent_frames.clone()
    }

    /// The last frame sent.
    pub fn last_sent(&self) -> Option<String> {
        self.lock().sent_frames.last().cloned()
    }

    /// Forget captured frames.
    pub fn clear_sent(&self) {
        self.lock().sent_frames.clear();
    }

    /// Address passed to the last successful `connect()`.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Simulate the relay dropping the connection.
    pub fn drop_connection(&self) {
        let mut inner = self.lock();
        inner.connected = false;
        inner.receive_queue.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connect_count += 1;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_frames.push(frame.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        inner
            .receive_queue
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("ws://relay").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.connected_address(), Some("ws://relay".to_string()));
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_captures_and_replays_frames() {
        let transport = MockTransport::new();
        transport.connect("ws://relay").await.unwrap();

        transport.send("one").await.unwrap();
        transport.send("two").await.unwrap();
        assert_eq!(transport.sent_frames(), vec!["one", "two"]);
        assert_eq!(transport.last_sent().as_deref(), Some("two"));

        transport.queue_frame("reply");
        assert_eq!(transport.recv().await.unwrap(), "reply");
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.send("x").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn forced_failures_apply_once() {
        let transport = MockTransport::new();
        transport.fail_next_connect("unreachable");
        assert!(transport.connect("ws://relay").await.is_err());
        transport.connect("ws://relay").await.unwrap();

        transport.fail_next_send("buffer full");
        assert!(matches!(
            transport.send("x").await,
            Err(TransportError::SendFailed(_))
        ));
        transport.send("x").await.unwrap();
    }

    #[tokio::test]
    async fn drop_connection_disconnects_clones() {
        let transport = MockTransport::new();
        let handle = transport.clone();
        transport.connect("ws://relay").await.unwrap();

        handle.drop_connection();
        assert!(!transport.is_connected());
    }
}
