//! WebSocket upgrade endpoint.

use crate::protocol::{self, AdmissionError, MAX_FRAME_SIZE};
use crate::server::ChatRelay;
use axum::extract::{ws::WebSocketUpgrade, ConnectInfo};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::net::SocketAddr;
use std::sync::Arc;

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = match self {
            AdmissionError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::AtCapacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// `GET /ws`: admit the peer, then hand the socket to a session.
///
/// `ConnectInfo` is absent when the router is driven in-process.
pub async fn ws_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, AdmissionError> {
    let ip = peer.map(|ConnectInfo(addr)| addr.ip());
    protocol::admit(&relay, ip)?;

    Ok(upgrade
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| protocol::serve_socket(relay, socket))
        .into_response())
}
