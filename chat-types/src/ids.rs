//! Identity types for veilchat.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ChatError;

/// Longest accepted username, in characters.
pub const MAX_USERNAME_LEN: usize = 32;

/// Longest accepted client-generated message ID.
pub const MAX_MESSAGE_ID_LEN: usize = 128;

/// A registered identity's public handle.
///
/// 1 to 32 characters from `[A-Za-z0-9_.-]`. Validated on construction and on
/// deserialization, so any `Username` in hand is well-formed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and wrap a username.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ChatError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ChatError::InvalidUsername("empty".into()));
        }
        if raw.chars().count() > MAX_USERNAME_LEN {
            return Err(ChatError::InvalidUsername(format!(
                "longer than {MAX_USERNAME_LEN} characters"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(ChatError::InvalidUsername(format!(
                "unexpected character {bad:?}"
            )));
        }
        Ok(Self(raw))
    }

    /// Borrow the username text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Username({})", self.0)
    }
}

/// Client-generated identifier of a direct message.
///
/// Globally unique by convention (clients default to UUID v4 text); receivers
/// rely on it for duplicate suppression.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh random message ID.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Validate and wrap a client-supplied message ID.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ChatError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ChatError::InvalidMessageId("empty".into()));
        }
        if raw.len() > MAX_MESSAGE_ID_LEN {
            return Err(ChatError::InvalidMessageId(format!(
                "longer than {MAX_MESSAGE_ID_LEN} bytes"
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ChatError::InvalidMessageId(
                "contains whitespace or control characters".into(),
            ));
        }
        Ok(Self(raw))
    }

    /// Borrow the ID text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageId {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MessageId> for String {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// Relay-assigned identifier of one live transport connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Create a new random ConnectionId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", &self.0.simple().to_string()[..8])
    }
}
