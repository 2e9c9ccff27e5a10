//! WebSocket transport backed by tokio-tungstenite.

use super::{Transport, TransportError, MAX_FRAME_SIZE};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport over a single WebSocket connection to the relay.
///
/// Sending and receiving use separate halves, so a reader task can wait on
/// `recv()` while other tasks send.
#[derive(Default)]
pub struct WsTransport {
    sink: Mutex<Option<SplitSink<Socket, Message>>>,
    stream: Mutex<Option<SplitStream<Socket>>>,
    connected: AtomicBool,
}

impl WsTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let (socket, _response) = connect_async(address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (sink, stream) = socket.split();

        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("websocket connected to {}", address);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(e) = sink.send(Message::Text(frame.to_owned().into())).await {
            self.mark_closed();
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > MAX_FRAME_SIZE {
                        return Err(TransportError::FrameTooLarge(text.len()));
                    }
                    return Ok(text.to_string());
                }
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.to_vec())
                        .map_err(|e| TransportError::ReceiveFailed(e.to_string()));
                }
                // tungstenite answers pings itself on the next write/flush
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    self.mark_closed();
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        if let Some(mut sink) = self.sink.lock().await.take() {
            // Best effort: the peer may already be gone.
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        self.stream.lock().await.take();
        Ok(())
    }
}
