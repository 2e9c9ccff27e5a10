//! Duplicate suppression for inbound messages.
//!
//! A message can reach a client twice: once live and once more from an
//! offline-queue replay after a reconnect. The tracker remembers the last
//! `capacity` message IDs and evicts the oldest first.

use std::collections::{HashSet, VecDeque};

use chat_types::MessageId;

/// Default number of message IDs remembered.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

/// Bounded set of recently seen message IDs.
#[derive(Debug)]
pub struct DedupTracker {
    capacity: usize,
    order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
}

impl DedupTracker {
    /// Create a tracker remembering at most `capacity` IDs (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id`; returns `true` the first time it is seen.
    pub fn observe(&mut self, id: &MessageId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.seen.insert(id.clone());
        true
    }

    /// Whether `id` is currently remembered.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Number of remembered IDs.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
