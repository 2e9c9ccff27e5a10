//! Self-destruct scheduling for messages carrying a `timer`.
//!
//! One deadline per message ID. Scheduling an ID that already has a deadline
//! replaces it; nothing stacks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chat_types::MessageId;

/// Pending self-destruct deadlines keyed by message ID.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    deadlines: HashMap<MessageId, Instant>,
}

impl ExpiryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` to expire `timer_secs` after `now`, replacing any prior deadline.
    pub fn schedule(&mut self, id: MessageId, timer_secs: u32, now: Instant) {
        let deadline = now + Duration::from_secs(u64::from(timer_secs));
        self.deadlines.insert(id, deadline);
    }

    /// Cancel a pending deadline. Returns whether one existed.
    pub fn cancel(&mut self, id: &MessageId) -> bool {
        self.deadlines.remove(id).is_some()
    }

    /// Remove and return every message whose deadline has passed, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<MessageId> {
        let mut due: Vec<(Instant, MessageId)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, deadline)| (*deadline, id.clone()))
            .collect();
        due.sort();
        for (_, id) in &due {
            self.deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Earliest pending deadline, for sizing a sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Number of pending deadlines.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
