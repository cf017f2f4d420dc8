//! HTTP surface of the management plane
//!
//! `/mcp` and `/auth/login` are reachable without a JWT; the rest of the
//! admin API sits behind the admin auth middleware. The rate limiter
//! wraps everything.

pub mod approvals;
pub mod auth;
pub mod export_import;
pub mod oauth;
pub mod ops;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::error::ApiError;
use crate::gateway;
use crate::middleware::require_admin;
use crate::state::AppState;

/// Build the full application router.
pub fn app(state: Arc<AppState>) -> Router {
    let admin_api = Router::new()
        .merge(approvals::router())
        .merge(export_import::router())
        .merge(oauth::router())
        .merge(ops::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(gateway::handle_mcp))
        .merge(auth::router(state.clone()))
        .nest("/api", admin_api)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

/// Rate-limit middleware around the whole surface.
async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let client_ip = state
        .rate_limiter
        .client_ip(&addr.ip().to_string(), request.headers());

    let decision = state.rate_limiter.check(&client_ip, &path);
    if !decision.allowed {
        let mut response = ApiError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        }
        .into_response();
        apply_headers(&mut response, &decision.headers);
        return response;
    }

    let mut response = next.run(request).await;
    // Retry-After only travels on denials
    let headers: Vec<_> = decision
        .headers
        .iter()
        .filter(|(name, _)| !name.starts_with("Retry"))
        .cloned()
        .collect();
    apply_headers(&mut response, &headers);
    response
}

fn apply_headers(response: &mut Response, headers: &[(&'static str, String)]) {
    for (name, value) in headers {
        let name = match axum::http::HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(_) => continue,
        };
        if let Ok(value) = axum::http::HeaderValue::from_str(value) {
            response.headers_mut().insert(name, value);
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sandbox_ok = state.sandbox.health().await.is_ok();
    Json(json!({
        "status": "ok",
        "sandbox": if sandbox_ok { "ok" } else { "unreachable" },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
