//! Connection state machine for the chat client.
//!
//! Pure and side-effect free: events go in, a new state plus a list of
//! actions come out. `chat-client` performs the I/O the actions describe.
//!
//! Registration happens exactly once per transport connection: the only way
//! into `Registering` is a successful connect, and `SendRegister` is only
//! produced by that transition. Reconnection retries forever with capped
//! exponential backoff.

use std::time::Duration;

use chat_types::Username;

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to the relay.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Transport is up, `register` sent, waiting for `registered`.
    Registering,
    /// Registered and able to send.
    Connected {
        /// Identity bound to this connection.
        username: Username,
    },
    /// Disconnected, waiting to reconnect.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            (Self::Disconnected, Event::ConnectRequested) => {
                (Self::Connecting, vec![Action::Connect])
            }

            (Self::Connecting, Event::ConnectSucceeded) => {
                (Self::Registering, vec![Action::SendRegister])
            }
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::EmitEvent(ConnectionEvent::ConnectionFailed { error }),
                    Action::StartReconnectTimer {
                        delay: calculate_backoff(1),
                    },
                ],
            ),

            (Self::Registering, Event::Registered { username }) => (
                Self::Connected {
                    username: username.clone(),
                },
                vec![Action::EmitEvent(ConnectionEvent::Connected { username })],
            ),
            (Self::Registering, Event::RegisterFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(ConnectionEvent::ConnectionFailed { error }),
                    Action::StartReconnectTimer {
                        delay: calculate_backoff(1),
                    },
                ],
            ),
            (Self::Registering, Event::Disconnected { reason }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::EmitEvent(ConnectionEvent::Disconnected { reason }),
                    Action::StartReconnectTimer {
                        delay: calculate_backoff(1),
                    },
                ],
            ),

            (Self::Connected { .. }, Event::Disconnected { reason }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::EmitEvent(ConnectionEvent::Disconnected { reason }),
                    Action::StartReconnectTimer {
                        delay: calculate_backoff(1),
                    },
                ],
            ),
            (Self::Connected { .. } | Self::Registering, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(ConnectionEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            (Self::Reconnecting { .. }, Event::ReconnectTimer) => {
                (Self::Connecting, vec![Action::Connect])
            }
            (Self::Reconnecting { .. }, Event::ConnectSucceeded) => {
                (Self::Registering, vec![Action::SendRegister])
            }
            (Self::Reconnecting { attempt }, Event::ConnectFailed { error }) => {
                let next_attempt = attempt.saturating_add(1);
                (
                    Self::Reconnecting {
                        attempt: next_attempt,
                    },
                    vec![
                        Action::EmitEvent(ConnectionEvent::ReconnectFailed {
                            attempt: next_attempt,
                            error,
                        }),
                        Action::StartReconnectTimer {
                            delay: calculate_backoff(next_attempt),
                        },
                    ],
                )
            }
            (Self::Reconnecting { .. } | Self::Connecting, Event::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CancelReconnect])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently registered with the relay.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Registering | Self::Reconnecting { .. }
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User requested connection.
    ConnectRequested,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Relay accepted the registration.
    Registered {
        /// Identity the relay bound.
        username: Username,
    },
    /// Relay rejected the registration.
    RegisterFailed {
        /// Error message from the relay.
        error: String,
    },
    /// Connection was lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// User requested disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the chat client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Initiate transport connection.
    Connect,
    /// Close the transport.
    Disconnect,
    /// Send the `register` event on the fresh connection.
    SendRegister,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit an event to the application.
    EmitEvent(ConnectionEvent),
}

/// Connection events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Registered with the relay.
    Connected {
        /// Identity bound to the connection.
        username: Username,
    },
    /// Connection or registration failed.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Disconnected from the relay.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Reconnection attempt failed.
    ReconnectFailed {
        /// Which reconnection attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
}

/// Calculate reconnection backoff with jitter.
///
/// Formula: min(30s, 2^attempt seconds) + random(0..1000ms)
pub fn calculate_backoff(attempt: u32) -> Duration {
    let base_secs = 2u64.pow(attempt.min(5)).min(30);
    Duration::from_secs(base_secs) + Duration::from_millis(random_jitter_ms())
}

/// Random jitter between 0 and 1000 milliseconds; no jitter if the OS RNG fails.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % 1001
}
