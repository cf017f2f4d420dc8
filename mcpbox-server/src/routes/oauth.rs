//! OAuth endpoints for the admin console
//!
//! The console is local and trusted, so provider errors are returned
//! verbatim here; the error type logs the full detail either way.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/oauth/credentials/{id}/start", post(start_flow))
        .route("/oauth/callback", get(callback))
        .route("/oauth/credentials/{id}/refresh", post(refresh))
        .route("/oauth/credentials/{id}/status", get(status))
        .route("/oauth/discover", post(discover))
}

async fn start_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let credential = state.credentials.repo().get(id).await?;
    let (authorization_url, flow_state) = state.oauth.start_authorization(&credential).await?;
    Ok(Json(json!({
        "authorization_url": authorization_url,
        "state": flow_state,
        "credential_id": id,
    })))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Json<JsonValue>> {
    let credential = state
        .credentials
        .repo()
        .find_by_oauth_state(&query.state)
        .await?
        .ok_or_else(|| ApiError::Validation("invalid or expired OAuth state".into()))?;

    let result = state
        .oauth
        .handle_callback(&credential, &query.code, &query.state)
        .await?;
    Ok(Json(json!({
        "success": true,
        "credential_id": credential.id,
        "has_refresh_token": result["refresh_token_stored"],
        "access_token_expires_at": result["expires_at"],
    })))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let credential = state.credentials.repo().get(id).await?;
    let result = state.oauth.refresh_token(&credential).await?;
    Ok(Json(json!({
        "success": true,
        "credential_id": id,
        "access_token_expires_at": result["expires_at"],
    })))
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let credential = state.credentials.repo().get(id).await?;
    let now = chrono::Utc::now();
    let is_expired = credential
        .access_token_expires_at
        .map(|at| at <= now)
        .unwrap_or(true);
    Ok(Json(json!({
        "credential_id": id,
        "has_access_token": credential.encrypted_access_token.is_some(),
        "has_refresh_token": credential.encrypted_refresh_token.is_some(),
        "is_expired": is_expired,
        "expires_at": credential.access_token_expires_at,
        "flow_pending": credential.oauth_state.is_some(),
    })))
}

#[derive(Deserialize)]
struct DiscoverBody {
    url: String,
}

async fn discover(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DiscoverBody>,
) -> ApiResult<Json<JsonValue>> {
    let metadata = state.oauth.discover(&body.url).await?;
    Ok(Json(json!({
        "authorization_endpoint": metadata.authorization_endpoint,
        "token_endpoint": metadata.token_endpoint,
        "registration_endpoint": metadata.registration_endpoint,
    })))
}
