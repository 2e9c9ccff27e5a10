//! Connection admission for the realtime endpoint.
//!
//! Runs before the WebSocket upgrade so rejected peers get a plain HTTP
//! status instead of a socket that closes immediately.

use crate::server::ChatRelay;
use crate::session::Session;
use axum::extract::ws::WebSocket;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Largest accepted WebSocket message (envelopes are capped separately).
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Why a connection was turned away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Too many connections from one address.
    #[error("connection rate limited for {0}")]
    RateLimited(IpAddr),

    /// Relay is at its session limit.
    #[error("session limit reached ({active}/{limit})")]
    AtCapacity {
        /// Sessions currently open.
        active: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// Decide whether a new connection from `peer` may proceed.
///
/// Peers with no known address (in-process tests) skip the per-IP limit.
pub fn admit(relay: &ChatRelay, peer: Option<IpAddr>) -> Result<(), AdmissionError> {
    if let Some(ip) = peer {
        if let Err(e) = relay.rate_limits().check_connection(ip) {
            tracing::warn!("Connection rate limited for {}: {}", ip, e);
            relay
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            return Err(AdmissionError::RateLimited(ip));
        }
    }

    let limit = relay.config().limits.max_concurrent_sessions;
    let active = relay.total_sessions();
    if active >= limit {
        tracing::warn!("Session limit reached ({}/{}), rejecting {:?}", active, limit, peer);
        return Err(AdmissionError::AtCapacity { active, limit });
    }
    Ok(())
}

/// Open a connection on `relay` and drive `socket` until it closes.
pub async fn serve_socket(relay: Arc<ChatRelay>, socket: WebSocket) {
    let (id, inbound) = relay.open_connection();
    Session::new(relay, id).run(socket, inbound).await;
}
