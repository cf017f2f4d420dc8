//! Authentication endpoints
//!
//! Login is rate-limited per IP independently of the global limiter.
//! Logout blacklists the access token's jti until its natural expiry
//! (A5); a password change invalidates every outstanding token (A4, S5).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{bearer_token, AuthContext};
use crate::middleware::require_admin;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/setup", post(setup))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .merge(
            Router::new()
                .route("/auth/logout", post(logout))
                .route("/auth/me", get(me))
                .route("/auth/change-password", post(change_password))
                .route_layer(axum::middleware::from_fn_with_state(state, require_admin)),
        )
}

#[derive(Deserialize)]
struct CredentialsBody {
    username: String,
    password: String,
}

async fn setup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsBody>,
) -> ApiResult<Json<JsonValue>> {
    let user = state.auth.create_admin(&body.username, &body.password).await?;
    Ok(Json(json!({"id": user.id, "username": user.username})))
}

async fn login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<CredentialsBody>,
) -> ApiResult<Json<JsonValue>> {
    state.auth.check_login_rate(&addr.ip().to_string())?;
    let user = state.auth.authenticate(&body.username, &body.password).await?;
    let tokens = state.auth.issue_tokens(&user)?;
    state
        .logs
        .record_activity("auth", "login", Some(&user.username), None, None, None, None)
        .await;
    Ok(Json(serde_json::to_value(tokens).expect("tokens serialise")))
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshBody>,
) -> ApiResult<Json<JsonValue>> {
    let user = state.auth.validate_refresh_token(&body.refresh_token).await?;
    let tokens = state.auth.issue_tokens(&user)?;
    Ok(Json(serde_json::to_value(tokens).expect("tokens serialise")))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> ApiResult<Json<JsonValue>> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    state.auth.revoke(token).await?;
    state
        .logs
        .record_activity("auth", "logout", Some(&ctx.username), None, None, None, None)
        .await;
    Ok(Json(json!({"detail": "Logged out"})))
}

async fn me(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<JsonValue>> {
    let user = state.auth.repo().get_user(ctx.user_id).await?;
    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "last_login_at": user.last_login_at,
    })))
}

#[derive(Deserialize)]
struct ChangePasswordBody {
    current_password: String,
    new_password: String,
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ChangePasswordBody>,
) -> ApiResult<Json<JsonValue>> {
    let user = state.auth.repo().get_user(ctx.user_id).await?;
    state
        .auth
        .change_password(&user, &body.current_password, &body.new_password)
        .await?;
    state
        .logs
        .record_activity(
            "auth",
            "change_password",
            Some(&ctx.username),
            None,
            None,
            None,
            None,
        )
        .await;
    Ok(Json(json!({"detail": "Password changed; all sessions invalidated"})))
}
