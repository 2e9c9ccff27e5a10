//! Prometheus metrics endpoint.

use crate::server::{ChatRelay, RelayMetrics};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const PREFIX: &str = "veilchat_relay";

fn counters(m: &RelayMetrics) -> [(&'static str, &'static str, u64); 11] {
    let load = |c: &std::sync::atomic::AtomicU64| c.load(Ordering::Relaxed);
    [
        ("connections_total", "Total WebSocket connections accepted", load(&m.connections_total)),
        ("registrations_total", "Successful register events", load(&m.registrations_total)),
        ("messages_delivered_total", "Messages forwarded to an online recipient", load(&m.messages_delivered)),
        ("messages_queued_total", "Messages stored for an offline recipient", load(&m.messages_queued)),
        ("messages_failed_total", "Messages acknowledged as failed", load(&m.messages_failed)),
        ("messages_drained_total", "Queued messages delivered on registration", load(&m.messages_drained)),
        ("receipts_forwarded_total", "Read receipts forwarded to senders", load(&m.receipts_forwarded)),
        ("typing_forwarded_total", "Typing events forwarded after throttling", load(&m.typing_forwarded)),
        ("bytes_relayed_total", "Envelope bytes accepted from senders", load(&m.bytes_relayed)),
        ("rate_limit_hits_total", "Total rate limit rejections", load(&m.rate_limit_hits)),
        ("errors_total", "Total protocol errors reported to clients", load(&m.errors_total)),
    ]
}

/// Render all metrics in Prometheus text format.
pub async fn render(relay: &ChatRelay) -> String {
    let gauges = [
        ("connections_active", "Open WebSocket connections", relay.total_sessions() as u64),
        ("online_users", "Registered users currently online", relay.presence().len().await as u64),
        ("rooms_active", "Live legacy rooms", relay.rooms().room_count() as u64),
        ("typing_active", "Senders with a live typing indicator", relay.typing().active() as u64),
        ("receipts_tracked", "Delivered messages awaiting a read receipt", relay.tracked_receipts() as u64),
        ("uptime_seconds", "Seconds since startup", relay.uptime().as_secs()),
    ];

    let mut body = String::new();
    let _ = writeln!(body, "# HELP {PREFIX}_info Server information");
    let _ = writeln!(body, "# TYPE {PREFIX}_info gauge");
    let _ = writeln!(
        body,
        "{PREFIX}_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );

    for (name, help, value) in gauges {
        let _ = writeln!(body, "# HELP {PREFIX}_{name} {help}");
        let _ = writeln!(body, "# TYPE {PREFIX}_{name} gauge");
        let _ = writeln!(body, "{PREFIX}_{name} {value}\n");
    }
    for (name, help, value) in counters(relay.metrics()) {
        let _ = writeln!(body, "# HELP {PREFIX}_{name} {help}");
        let _ = writeln!(body, "# TYPE {PREFIX}_{name} counter");
        let _ = writeln!(body, "{PREFIX}_{name} {value}\n");
    }
    body
}

/// Prometheus metrics handler.
pub async fn metrics_handler(Extension(relay): Extension<Arc<ChatRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay).await,
    )
}
