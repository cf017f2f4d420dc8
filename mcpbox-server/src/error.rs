//! API error type and HTTP mapping
//!
//! Internal detail is logged, never echoed: outbound messages are either
//! validation text (safe by construction) or a fixed generic phrase.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use mcpbox_storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Inbound validation failure; the message is returned verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Authentication failed; the reason is logged, never echoed.
    #[error("unauthorized")]
    Unauthorized { reason: String },

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// OAuth provider error, sanitised for remote callers.
    #[error("{public}")]
    OAuth { public: String, detail: String },

    /// Anything internal: DB failures, sandbox unavailability, crypto
    /// failures. Detail is logged; the client sees a generic message.
    #[error("internal error")]
    Internal { detail: String },
}

impl ApiError {
    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Internal {
            detail: detail.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::OAuth { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ApiError::NotFound(what),
            StorageError::Conflict(what) => ApiError::Conflict(what),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<mcpbox_crypto::CryptoError> for ApiError {
    fn from(err: mcpbox_crypto::CryptoError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Unauthorized { reason } => {
                warn!(reason, "request rejected: unauthorized");
                let mut response = (
                    status,
                    Json(json!({"detail": "Not authenticated"})),
                )
                    .into_response();
                response.headers_mut().insert(
                    axum::http::header::WWW_AUTHENTICATE,
                    axum::http::HeaderValue::from_static("Bearer"),
                );
                response
            }
            ApiError::RateLimited { retry_after_secs } => {
                let mut response = (
                    status,
                    Json(json!({
                        "detail": "Rate limit exceeded. Please try again later.",
                        "retry_after": retry_after_secs,
                    })),
                )
                    .into_response();
                if let Ok(value) =
                    axum::http::HeaderValue::from_str(&retry_after_secs.to_string())
                {
                    response
                        .headers_mut()
                        .insert(axum::http::header::RETRY_AFTER, value);
                }
                response
            }
            ApiError::OAuth { public, detail } => {
                warn!(detail, "OAuth error");
                (status, Json(json!({"detail": public}))).into_response()
            }
            ApiError::Internal { detail } => {
                error!(detail, "internal error");
                (
                    status,
                    Json(json!({"detail": "Internal server error"})),
                )
                    .into_response()
            }
            other => (status, Json(json!({"detail": other.to_string()}))).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_kinds() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::unauthorized("expired").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::RateLimited { retry_after_secs: 3 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::internal("db down").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_not_in_display() {
        let err = ApiError::internal("connection refused to 127.0.0.1:5432");
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn storage_not_found_maps_to_404() {
        let err: ApiError = StorageError::NotFound("tool x".into()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
