//! Identity directory endpoints.

use crate::error::DirectoryError;
use crate::server::ChatRelay;
use crate::storage::Registration;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use chat_types::Username;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Errors returned by the HTTP surface, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Request failed validation.
    #[error("{0}")]
    BadRequest(String),

    /// Username or key is already taken.
    #[error("{0}")]
    Conflict(String),

    /// Nothing registered under that name.
    #[error("{0}")]
    NotFound(String),

    /// Global request quota exhausted.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Backend failure; detail is logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HttpError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            HttpError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            HttpError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            HttpError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            HttpError::Internal(detail) => {
                tracing::error!("directory request failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

impl From<DirectoryError> for HttpError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Conflict(_) | DirectoryError::PublicKeyTaken => {
                HttpError::Conflict(e.to_string())
            }
            DirectoryError::InvalidKey { .. } => HttpError::BadRequest(e.to_string()),
            DirectoryError::NotFound(_) => HttpError::NotFound(e.to_string()),
            DirectoryError::Storage(inner) => HttpError::Internal(inner.to_string()),
        }
    }
}

fn check_quota(relay: &ChatRelay) -> Result<(), HttpError> {
    if relay.rate_limits().check_global().is_err() {
        relay
            .metrics()
            .rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
        return Err(HttpError::RateLimited);
    }
    Ok(())
}

/// Body of `POST /register`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Requested username.
    pub username: String,
    /// Base64 X25519 public key.
    pub public_key: String,
}

/// Response carrying a registered identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    /// Username.
    pub username: String,
    /// Base64 public key.
    pub public_key: String,
}

/// Response of `GET /username/:username`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityResponse {
    /// Whether the name can still be registered.
    pub available: bool,
}

/// Response of `GET /publicKey/:username`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    /// Base64 public key.
    pub public_key: String,
}

/// `POST /register`: 201 on create, 200 when re-registering the same key.
pub async fn register_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<IdentityResponse>), HttpError> {
    check_quota(&relay)?;

    let username =
        Username::parse(request.username).map_err(|e| HttpError::BadRequest(e.to_string()))?;
    let key = STANDARD
        .decode(request.public_key.trim())
        .map_err(|_| HttpError::BadRequest("publicKey is not valid base64".to_string()))?;

    let status = match relay.directory().register(&username, &key).await? {
        Registration::Created => {
            tracing::info!("registered new identity {}", username);
            StatusCode::CREATED
        }
        Registration::Existing => StatusCode::OK,
    };

    Ok((
        status,
        Json(IdentityResponse {
            username: username.to_string(),
            public_key: STANDARD.encode(&key),
        }),
    ))
}

/// `GET /username/:username`. Invalid names are reported unavailable.
pub async fn availability_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
    Path(raw): Path<String>,
) -> Result<Json<AvailabilityResponse>, HttpError> {
    check_quota(&relay)?;

    let available = match Username::parse(raw) {
        Ok(username) => relay.directory().is_available(&username).await?,
        Err(_) => false,
    };
    Ok(Json(AvailabilityResponse { available }))
}

/// `GET /publicKey/:username`.
pub async fn public_key_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
    Path(raw): Path<String>,
) -> Result<Json<PublicKeyResponse>, HttpError> {
    check_quota(&relay)?;

    let username = Username::parse(raw.clone())
        .map_err(|_| HttpError::NotFound(format!("user not found: {raw}")))?;
    let key = relay.directory().lookup(&username).await?;
    Ok(Json(PublicKeyResponse {
        public_key: STANDARD.encode(key),
    }))
}
