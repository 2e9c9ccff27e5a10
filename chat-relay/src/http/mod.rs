//! HTTP endpoints for veilchat-relay.
//!
//! Serves the identity directory, the realtime WebSocket endpoint, health
//! checks and metrics from one router.

pub mod directory;
pub mod health;
mod metrics;
mod ws;

use crate::server::ChatRelay;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use directory::{
    AvailabilityResponse, HttpError, IdentityResponse, PublicKeyResponse, RegisterRequest,
};
pub use health::HealthStatus;
pub use metrics::render as render_metrics;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<ChatRelay>) -> Router {
    let mut router = Router::new()
        .route("/register", post(directory::register_handler))
        .route("/username/:username", get(directory::availability_handler))
        .route("/publicKey/:username", get(directory::public_key_handler))
        .route("/health", get(health::health_handler))
        .route("/ws", get(ws::ws_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router
        .layer(Extension(relay))
        .layer(TraceLayer::new_for_http())
}
