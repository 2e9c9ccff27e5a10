//! Typing indicator logic on the client side.
//!
//! [`TypingDebouncer`] limits how often a client emits `typing`.
//! [`TypingIndicators`] tracks which peers are currently typing and lets each
//! indicator lapse on its own after a quiet period, for relays that never send
//! an explicit stop.
//!
//! Callers pass `Instant`s in, so everything here is deterministic in tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chat_types::Username;

/// Minimum gap between two outgoing typing events.
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(500);

/// How long an indicator stays lit without a fresh event.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(2);

/// Emits at most one typing event per `interval`.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl TypingDebouncer {
    /// Create a debouncer with a custom interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns true (and records the emission) if an event may go out at `now`.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Forget the last emission, e.g. after sending the message itself.
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_DEBOUNCE)
    }
}

/// Self-expiring "peer is typing" indicators.
#[derive(Debug, Clone)]
pub struct TypingIndicators {
    timeout: Duration,
    expiries: HashMap<Username, Instant>,
}

impl TypingIndicators {
    /// Create an indicator map with a custom quiet period.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            expiries: HashMap::new(),
        }
    }

    /// Apply a typing update from `sender`.
    ///
    /// A start replaces any pending expiry with a fresh one; a stop clears it.
    pub fn on_update(&mut self, sender: Username, is_typing: bool, now: Instant) {
        if is_typing {
            self.expiries.insert(sender, now + self.timeout);
        } else {
            self.expiries.remove(&sender);
        }
    }

    /// Drop `sender`'s indicator, e.g. once their message arrives.
    pub fn clear(&mut self, sender: &Username) {
        self.expiries.remove(sender);
    }

    /// Whether `sender` is shown as typing at `now`.
    pub fn is_typing(&self, sender: &Username, now: Instant) -> bool {
        self.expiries.get(sender).is_some_and(|deadline| now < *deadline)
    }

    /// Remove lapsed indicators, returning the senders that were cleared.
    pub fn expire(&mut self, now: Instant) -> Vec<Username> {
        let mut lapsed: Vec<Username> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &lapsed {
            self.expiries.remove(name);
        }
        lapsed.sort();
        lapsed
    }

    /// Peers currently typing, sorted.
    pub fn active(&self, now: Instant) -> Vec<Username> {
        let mut names: Vec<Username> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| now < **deadline)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for TypingIndicators {
    fn default() -> Self {
        Self::new(TYPING_EXPIRY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    #[test]
    fn debouncer_allows_first_event() {
        let mut debounce = TypingDebouncer::default();
        assert!(debounce.should_emit(Instant::now()));
    }

    #[test]
    fn debouncer_suppresses_within_interval() {
        let mut debounce = TypingDebouncer::default();
        let t0 = Instant::now();
        assert!(debounce.should_emit(t0));
        assert!(!debounce.should_emit(t0 + Duration::from_millis(100)));
        assert!(!debounce.should_emit(t0 + Duration::from_millis(499)));
        assert!(debounce.should_emit(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn debouncer_reset_allows_immediate_emit() {
        let mut debounce = TypingDebouncer::default();
        let t0 = Instant::now();
        debounce.should_emit(t0);
        debounce.reset();
        assert!(debounce.should_emit(t0 + Duration::from_millis(10)));
    }

    #[test]
    fn indicator_clears_after_two_seconds() {
        let mut indicators = TypingIndicators::default();
        let t0 = Instant::now();
        indicators.on_update(name("alice"), true, t0);

        assert!(indicators.is_typing(&name("alice"), t0 + Duration::from_millis(1999)));
        assert!(!indicators.is_typing(&name("alice"), t0 + Duration::from_secs(2)));
        assert_eq!(
            indicators.expire(t0 + Duration::from_secs(2)),
            vec![name("alice")]
        );
        assert!(indicators.active(t0 + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn new_event_replaces_pending_expiry() {
        let mut indicators = TypingIndicators::default();
        let t0 = Instant::now();
        indicators.on_update(name("alice"), true, t0);
        indicators.on_update(name("alice"), true, t0 + Duration::from_millis(1500));

        // The first deadline (t0+2s) no longer applies.
        assert!(indicators.is_typing(&name("alice"), t0 + Duration::from_millis(3000)));
        assert!(!indicators.is_typing(&name("alice"), t0 + Duration::from_millis(3500)));
    }

    #[test]
    fn explicit_stop_clears_immediately() {
        let mut indicators = TypingIndicators::default();
        let t0 = Instant::now();
        indicators.on_update(name("alice"), true, t0);
        indicators.on_update(name("alice"), false, t0 + Duration::from_millis(10));
        assert!(!indicators.is_typing(&name("alice"), t0 + Duration::from_millis(20)));
    }

    #[test]
    fn active_lists_only_live_indicators() {
        let mut indicators = TypingIndicators::default();
        let t0 = Instant::now();
        indicators.on_update(name("bob"), true, t0);
        indicators.on_update(name("alice"), true, t0 + Duration::from_secs(1));

        assert_eq!(
            indicators.active(t0 + Duration::from_millis(1500)),
            vec![name("alice"), name("bob")]
        );
        assert_eq!(
            indicators.active(t0 + Duration::from_millis(2500)),
            vec![name("alice")]
        );
    }
}
