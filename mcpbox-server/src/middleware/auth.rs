//! Admin authentication middleware
//!
//! Extracts the Bearer token, validates it end to end (signature, expiry,
//! type, revocation, password version) and injects an [`AuthContext`]
//! into the request. Failures return 401 with `WWW-Authenticate: Bearer`
//! and never reveal which check failed.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Identity of the authenticated admin, available as a request extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
}

/// Pull the Bearer token out of the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware guarding the admin API.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };
    match state.auth.validate_access_token(token).await {
        Ok(user) => {
            request.extensions_mut().insert(AuthContext {
                user_id: user.id,
                username: user.username,
            });
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert("authorization", "Basic dXNlcg==".parse().unwrap());
        assert!(bearer_token(&headers).is_none());

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
