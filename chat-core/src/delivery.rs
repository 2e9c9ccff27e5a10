//! Sender-side delivery ledger.
//!
//! Tracks the status of every message this client sent, enforcing the
//! monotonic ordering of [`MessageStatus`]. Late or reordered acks (a
//! `delivered` arriving after `read`, say) are ignored rather than rolling
//! the status back.

use std::collections::{HashMap, VecDeque};

use chat_types::{MessageId, MessageStatus};

/// Error type for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The message was never recorded as sent.
    UnknownMessage(MessageId),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::UnknownMessage(id) => write!(f, "unknown message: {}", id),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Result of applying a status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Status moved forward.
    Advanced {
        /// Status before the update.
        from: MessageStatus,
        /// Status after the update.
        to: MessageStatus,
    },
    /// Update was stale or repeated; status unchanged.
    Ignored {
        /// Status that stays in effect.
        current: MessageStatus,
    },
}

/// Outgoing message statuses, bounded to the most recent `max_entries`.
#[derive(Debug)]
pub struct DeliveryLedger {
    max_entries: usize,
    order: VecDeque<MessageId>,
    statuses: HashMap<MessageId, MessageStatus>,
}

impl DeliveryLedger {
    /// Create a ledger that forgets the oldest entries past `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            order: VecDeque::new(),
            statuses: HashMap::new(),
        }
    }

    /// Record a freshly emitted message as `sent`.
    pub fn record_sent(&mut self, id: MessageId) {
        if self.statuses.contains_key(&id) {
            return;
        }
        if self.order.len() >= self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.statuses.insert(id, MessageStatus::Sent);
    }

    /// Apply a status reported by the relay.
    pub fn apply(
        &mut self,
        id: &MessageId,
        status: MessageStatus,
    ) -> Result<Transition, LedgerError> {
        let current = self
            .statuses
            .get_mut(id)
            .ok_or_else(|| LedgerError::UnknownMessage(id.clone()))?;

        if current.can_advance_to(status) {
            let from = *current;
            *current = status;
            Ok(Transition::Advanced { from, to: status })
        } else {
            Ok(Transition::Ignored { current: *current })
        }
    }

    /// Current status of a sent message.
    pub fn status(&self, id: &MessageId) -> Option<MessageStatus> {
        self.statuses.get(id).copied()
    }

    /// Number of tracked messages.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no messages are tracked.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
