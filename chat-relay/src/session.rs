//! Per-connection session management.
//!
//! Each WebSocket gets a [`Session`] that tracks registration state and turns
//! inbound frames into relay calls. Outbound events flow through the
//! connection table to a writer task owned by [`Session::run`].

use crate::connections::Inbound;
use crate::error::{ProtocolError, ProtocolResult};
use crate::server::ChatRelay;
use axum::extract::ws::{Message, WebSocket};
use chat_types::{ClientEvent, ConnectionId, Username};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Session state machine states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `register`. Room events are still accepted.
    AwaitingRegister,
    /// Bound to a directory identity.
    Active {
        /// The registered username.
        username: Username,
    },
    /// Session is closing.
    Closing,
}

/// A per-connection session.
pub struct Session {
    relay: Arc<ChatRelay>,
    id: ConnectionId,
    state: SessionState,
    joined_room: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session for a connection already opened on `relay`.
    pub fn new(relay: Arc<ChatRelay>, id: ConnectionId) -> Self {
        Self {
            relay,
            id,
            state: SessionState::AwaitingRegister,
            joined_room: false,
        }
    }

    /// Connection this session serves.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Registered username, if any.
    pub fn username(&self) -> Option<&Username> {
        match &self.state {
            SessionState::Active { username } => Some(username),
            _ => None,
        }
    }

    /// Whether the register deadline still applies.
    fn awaiting_identity(&self) -> bool {
        self.state == SessionState::AwaitingRegister && !self.joined_room
    }

    /// Handle one text frame.
    ///
    /// Errors are reported to the client by the caller; none of them end the
    /// session.
    pub async fn handle_frame(&mut self, text: &str) -> ProtocolResult<()> {
        let event = ClientEvent::from_json(text)?;
        if self.state == SessionState::Closing {
            return Ok(());
        }

        match event {
            ClientEvent::Register(request) => {
                if self.username().is_some() {
                    return Err(ProtocolError::AlreadyRegistered);
                }
                let username = self.relay.register(self.id, request).await?;
                self.state = SessionState::Active { username };
                Ok(())
            }
            ClientEvent::JoinRoom(request) => {
                self.relay.join_room(self.id, request)?;
                self.joined_room = true;
                Ok(())
            }
            ClientEvent::LeaveRoom(request) => self.relay.leave_room(self.id, &request.room_name),
            ClientEvent::RoomMessage(post) => self.relay.post_to_room(self.id, post),
            ClientEvent::Message(message) => {
                let username = self.registered().await?;
                self.relay.route_message(self.id, &username, message).await
            }
            ClientEvent::MessageRead(receipt) => {
                let username = self.registered().await?;
                self.relay.mark_read(&username, receipt).await;
                Ok(())
            }
            ClientEvent::Typing(notice) => {
                let username = self.registered().await?;
                self.relay.typing_notice(&username, notice).await;
                Ok(())
            }
        }
    }

    /// Username this connection may act as.
    ///
    /// A session whose username was taken over by a newer connection moves
    /// to `Closing` and stops acting for it.
    async fn registered(&mut self) -> ProtocolResult<Username> {
        let username = self.username().cloned().ok_or(ProtocolError::NotRegistered)?;
        if self.relay.presence().connection_of(&username).await != Some(self.id) {
            tracing::info!("{:?} was superseded as {}", self.id, username);
            self.state = SessionState::Closing;
            return Err(ProtocolError::Superseded);
        }
        Ok(username)
    }

    /// Run the session until the socket closes or the register deadline
    /// passes.
    pub async fn run(mut self, socket: WebSocket, mut inbound: Inbound) {
        tracing::info!("New connection {:?}", self.id);
        let (mut sink, mut stream) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode outbound event: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let timeout_secs = self.relay.config().limits.register_timeout_secs;
        let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline, if self.awaiting_identity() => {
                    tracing::warn!("Register timeout ({}s) for {:?}", timeout_secs, self.id);
                    break;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_frame(&text).await {
                            tracing::debug!("Rejected frame on {:?}: {}", self.id, e);
                            self.relay.report_error(self.id, &e);
                        }
                        if self.state == SessionState::Closing {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let e = ProtocolError::InvalidMessage {
                            reason: "binary frames are not supported".to_string(),
                        };
                        self.relay.report_error(self.id, &e);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong are answered by axum.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Connection {:?} errored: {}", self.id, e);
                        break;
                    }
                },
            }
        }

        self.close().await;
        // Closing the connection drops the outbound sender, which ends the writer.
        if let Err(e) = writer.await {
            tracing::debug!("Writer task for {:?} ended abnormally: {}", self.id, e);
        }
    }

    /// Release presence, rooms and the outbound channel.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closing);
        let username = match previous {
            SessionState::Active { username } => Some(username),
            SessionState::AwaitingRegister | SessionState::Closing => None,
        };
        self.relay.disconnect(self.id, username.as_ref()).await;
    }
}
