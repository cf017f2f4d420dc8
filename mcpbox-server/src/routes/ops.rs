//! Operational endpoints: circuit breakers, session pool, rate limiter

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value as JsonValue};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ops/circuits", get(circuits))
        .route("/ops/circuits/reset", post(reset_circuits))
        .route("/ops/pool", get(pool))
        .route("/ops/rate-limits", get(rate_limits))
        .route("/logs/activity", get(activity_logs))
        .route("/logs/executions", get(execution_logs))
}

#[derive(serde::Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    page_size: Option<i64>,
    #[serde(default)]
    tool_id: Option<uuid::Uuid>,
}

impl PageQuery {
    fn limit_offset(&self) -> (i64, i64) {
        let page_size = self.page_size.unwrap_or(50).clamp(1, 200);
        let page = self.page.unwrap_or(1).max(1);
        (page_size, (page - 1) * page_size)
    }
}

async fn activity_logs(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<PageQuery>,
) -> ApiResult<Json<JsonValue>> {
    let (limit, offset) = query.limit_offset();
    let logs = state.logs.repo().list_activity(limit, offset).await?;
    Ok(Json(json!({"items": logs})))
}

async fn execution_logs(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<PageQuery>,
) -> ApiResult<Json<JsonValue>> {
    let (limit, offset) = query.limit_offset();
    let logs = state
        .logs
        .repo()
        .list_executions(query.tool_id, limit, offset)
        .await?;
    Ok(Json(json!({"items": logs})))
}

async fn circuits(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({"circuits": state.breakers.snapshots()}))
}

async fn reset_circuits(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    state.breakers.reset_all();
    Json(json!({"detail": "All circuits reset"}))
}

/// Session-pool stats live in the sandbox; proxy its health detail.
async fn pool(State(state): State<Arc<AppState>>) -> ApiResult<Json<JsonValue>> {
    match state.sandbox.health().await {
        Ok(health) => Ok(Json(json!({"session_pool": health.get("session_pool")}))),
        Err(e) => Ok(Json(json!({"session_pool": null, "error": e.to_string()}))),
    }
}

async fn rate_limits(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    let stats: Vec<JsonValue> = state
        .rate_limiter
        .stats()
        .into_iter()
        .map(|(bucket, minute, hour, tokens)| {
            json!({
                "bucket": bucket,
                "minute_count": minute,
                "hour_count": hour,
                "tokens": (tokens * 100.0).round() / 100.0,
            })
        })
        .collect();
    Json(json!({"buckets": stats}))
}
