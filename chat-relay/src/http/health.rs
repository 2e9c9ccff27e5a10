//! Health check endpoint.

use crate::server::ChatRelay;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Open WebSocket connections, registered or not.
    pub connections: usize,
    /// Registered users currently online.
    pub online_users: usize,
    /// Live legacy rooms.
    pub rooms: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<ChatRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: relay.total_sessions(),
        online_users: relay.presence().len().await,
        rooms: relay.rooms().room_count(),
        uptime_seconds: relay.uptime().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serializes() {
        let status = HealthStatus {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            connections: 7,
            online_users: 5,
            rooms: 2,
            uptime_seconds: 90,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"online_users\":5"));
    }
}
