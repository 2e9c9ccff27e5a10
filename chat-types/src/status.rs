//! Delivery status of a direct message.

use serde::{Deserialize, Serialize};

/// Where a message is in its delivery lifecycle.
///
/// Sender side: `sent → delivered | queued | failed → read`.
/// Recipient side: `delivered` for live delivery, `received` for a message
/// redelivered from the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Emitted by the client, no acknowledgement yet
    Sent,
    /// Held in the offline queue for the recipient
    Queued,
    /// Forwarded to a live recipient connection
    Delivered,
    /// Redelivered from the offline queue on registration
    Received,
    /// Recipient reported it as read
    Read,
    /// Terminal failure (unknown recipient, offline without queuing, decryption)
    Failed,
}

impl MessageStatus {
    fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Sent => Some(0),
            MessageStatus::Queued => Some(1),
            MessageStatus::Delivered | MessageStatus::Received => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` respects monotonic ordering.
    ///
    /// Nothing leaves `failed`, and `failed` is only reachable before the
    /// message reached the recipient.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (None, _) => false,
            (Some(_), None) => matches!(self, MessageStatus::Sent | MessageStatus::Queued),
            (Some(current), Some(next)) => next > current,
        }
    }

    /// True for statuses nothing can follow.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageStatus::Delivered).unwrap(),
            "\"delivered\""
        );
        let parsed: MessageStatus = serde_json::from_str("\"received\"").unwrap();
        assert_eq!(parsed, MessageStatus::Received);
    }

    #[test]
    fn forward_transitions_allowed() {
        use MessageStatus::*;
        assert!(Sent.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Queued));
        assert!(Queued.can_advance_to(Delivered));
        assert!(Delivered.can_advance_to(Read));
        assert!(Queued.can_advance_to(Read));
    }

    #[test]
    fn backward_and_repeated_transitions_rejected() {
        use MessageStatus::*;
        assert!(!Delivered.can_advance_to(Queued));
        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Delivered));
    }

    #[test]
    fn failed_is_terminal_and_only_before_delivery() {
        use MessageStatus::*;
        assert!(Sent.can_advance_to(Failed));
        assert!(Queued.can_advance_to(Failed));
        assert!(!Delivered.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Delivered));
        assert!(!Failed.can_advance_to(Read));
        assert!(Failed.is_terminal());
        assert!(Read.is_terminal());
        assert!(!Queued.is_terminal());
    }
}
