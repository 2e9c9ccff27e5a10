//! Error types for veilchat wire types.

use thiserror::Error;

/// Errors that can occur while building or parsing wire types.
#[derive(Debug, Error)]
pub enum ChatError {
    /// JSON serialization or deserialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Username failed validation
    #[error("invalid username: {0}")]
    InvalidUsername(String),

    /// Message ID failed validation
    #[error("invalid message id: {0}")]
    InvalidMessageId(String),

    /// Envelope is not valid base64 or is too short
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ChatError::InvalidUsername("empty".into());
        assert_eq!(err.to_string(), "invalid username: empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatError>();
    }
}
