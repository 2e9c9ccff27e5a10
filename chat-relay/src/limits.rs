//! Rate limiting for veilchat-relay.
//!
//! Provides protection against connection flooding and message spam:
//! - new WebSocket connections per client IP
//! - direct and room messages per registered username
//! - forwarded typing events per username (the typing throttle)
//! - a global request rate across all clients
//!
//! All keyed limiters use governor backed by DashMap.

use crate::config::{LimitsConfig, TypingConfig};
use chat_types::Username;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Zero in config means "as strict as possible", not "unlimited".
fn at_least_one(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// New connections per client IP, per minute.
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Messages per sender, per minute.
    message_limiter: Arc<KeyedLimiter<Username>>,

    /// One forwarded typing event per sender per throttle period.
    typing_limiter: Arc<KeyedLimiter<Username>>,

    /// Global rate limiter across all clients.
    ///
    /// Prevents aggregate overload even if individual clients are within limits.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_keys", &self.connection_limiter.len())
            .field("message_keys", &self.message_limiter.len())
            .field("typing_keys", &self.typing_limiter.len())
            .finish_non_exhaustive()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(limits: &LimitsConfig, typing: &TypingConfig) -> Self {
        let connection_quota = Quota::per_minute(at_least_one(limits.connections_per_ip));
        let message_quota = Quota::per_minute(at_least_one(limits.messages_per_minute));
        let global_quota = Quota::per_second(at_least_one(limits.global_requests_per_second));
        let typing_quota = Quota::with_period(Duration::from_millis(typing.throttle_ms.max(1)))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(connection_quota)),
            message_limiter: Arc::new(RateLimiter::keyed(message_quota)),
            typing_limiter: Arc::new(RateLimiter::keyed(typing_quota)),
            global_limiter: Arc::new(RateLimiter::direct(global_quota)),
        }
    }

    /// Check if a new connection from `ip` is allowed.
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&ip)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if `sender` may send another message.
    pub fn check_message(&self, sender: &Username) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(sender)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Whether a typing event from `sender` should be forwarded now.
    ///
    /// A `false` is not an error: the event is throttled, not rejected.
    pub fn allow_typing(&self, sender: &Username) -> bool {
        self.typing_limiter.check_key(sender).is_ok()
    }

    /// Check if the global request rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict idle entries from the keyed limiters.
    ///
    /// `retain_recent()` drops keys whose cells have fully recharged. Called
    /// periodically from the cleanup task.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
        self.typing_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    #[error("connection rate limit exceeded")]
    ConnectionLimitExceeded,
    /// Too many messages from this user.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// Global request rate exceeded across all clients.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
