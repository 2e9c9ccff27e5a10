//! Outbound channels for live connections.
//!
//! Each WebSocket session owns a writer task that drains an unbounded channel;
//! everything else in the relay talks to a connection through this table.

use chat_types::{ConnectionId, ServerEvent};
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Receiving half, drained by the connection's writer task.
pub type Inbound = mpsc::UnboundedReceiver<ServerEvent>;

/// Live connections by ID.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    senders: DashMap<ConnectionId, Outbound>,
}

impl ConnectionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for a new connection.
    pub fn open(&self, id: ConnectionId) -> Inbound {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(id, tx);
        rx
    }

    /// Forget a connection. Its writer task ends once the queue drains.
    pub fn close(&self, id: ConnectionId) {
        self.senders.remove(&id);
    }

    /// Queue `event` for `id`.
    ///
    /// Returns `false` if the connection is gone or its writer has stopped.
    pub fn send(&self, id: ConnectionId, event: ServerEvent) -> bool {
        match self.senders.get(&id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Whether `id` is still open.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.senders
            .get(&id)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Whether no connections are open.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
