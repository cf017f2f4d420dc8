//! Approval endpoints: tool review plus network/module request decisions

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use mcpbox_core::RequestStatus;

use crate::error::ApiResult;
use crate::middleware::AuthContext;
use crate::services::approval::SecurityProfile;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/approvals/requests", get(list_requests))
        .route("/approvals/network/{id}/approve", post(approve_network))
        .route("/approvals/network/{id}/reject", post(reject_network))
        .route("/approvals/modules/{id}/approve", post(approve_module))
        .route("/approvals/modules/{id}/reject", post(reject_module))
        .route("/tools/{id}/approve", post(approve_tool))
        .route("/tools/{id}/reject", post(reject_tool))
        .route("/tools/{id}/rollback/{version}", post(rollback_tool))
        .route("/sources/{id}/discover", post(discover_source))
        .route("/security-profile", post(apply_profile))
}

#[derive(Deserialize)]
struct StatusFilter {
    status: Option<String>,
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<StatusFilter>,
) -> ApiResult<Json<JsonValue>> {
    let status = match filter.status.as_deref() {
        Some(raw) => Some(raw.parse::<RequestStatus>().map_err(|e| {
            crate::error::ApiError::Validation(e.to_string())
        })?),
        None => None,
    };
    let network = state.approval.approvals().list_network_requests(status).await?;
    let modules = state.approval.approvals().list_module_requests(status).await?;
    Ok(Json(json!({
        "network_requests": network,
        "module_requests": modules,
    })))
}

async fn approve_network(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let request = state
        .approval
        .decide_network_request(id, true, &ctx.username)
        .await?;
    state
        .logs
        .record_activity(
            "approval",
            "network_approved",
            Some(&ctx.username),
            Some(request.server_id),
            request.tool_id,
            None,
            Some(json!({"host": request.host, "port": request.port})),
        )
        .await;
    Ok(Json(serde_json::to_value(request).expect("request serialises")))
}

async fn reject_network(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let request = state
        .approval
        .decide_network_request(id, false, &ctx.username)
        .await?;
    Ok(Json(serde_json::to_value(request).expect("request serialises")))
}

async fn approve_module(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let request = state
        .approval
        .decide_module_request(id, true, &ctx.username)
        .await?;
    state
        .logs
        .record_activity(
            "approval",
            "module_approved",
            Some(&ctx.username),
            Some(request.server_id),
            request.tool_id,
            None,
            Some(json!({"module": request.module_name})),
        )
        .await;
    Ok(Json(serde_json::to_value(request).expect("request serialises")))
}

async fn reject_module(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let request = state
        .approval
        .decide_module_request(id, false, &ctx.username)
        .await?;
    Ok(Json(serde_json::to_value(request).expect("request serialises")))
}

async fn approve_tool(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let tool = state.approval.approve_tool(id, &ctx.username).await?;
    state
        .logs
        .record_activity(
            "approval",
            "tool_approved",
            Some(&ctx.username),
            Some(tool.server_id),
            Some(tool.id),
            None,
            None,
        )
        .await;
    Ok(Json(serde_json::to_value(tool).expect("tool serialises")))
}

#[derive(Deserialize, Default)]
struct RejectBody {
    reason: Option<String>,
}

async fn reject_tool(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> ApiResult<Json<JsonValue>> {
    let tool = state
        .approval
        .reject_tool(id, &ctx.username, body.reason.as_deref())
        .await?;
    Ok(Json(serde_json::to_value(tool).expect("tool serialises")))
}

async fn rollback_tool(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((id, version)): Path<(Uuid, i64)>,
) -> ApiResult<Json<JsonValue>> {
    let tool = state.approval.rollback_tool(id, version).await?;
    state
        .logs
        .record_activity(
            "tool",
            "rollback",
            Some(&ctx.username),
            Some(tool.server_id),
            Some(tool.id),
            None,
            Some(json!({"to_version": version})),
        )
        .await;
    Ok(Json(serde_json::to_value(tool).expect("tool serialises")))
}

async fn discover_source(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let (discovered, imported) = state.approval.discover_external_source(id).await?;
    state
        .logs
        .record_activity(
            "external_source",
            "discover",
            Some(&ctx.username),
            None,
            None,
            None,
            Some(json!({"discovered": discovered, "imported": imported})),
        )
        .await;
    Ok(Json(json!({"discovered": discovered, "imported": imported})))
}

#[derive(Deserialize)]
struct ProfileBody {
    profile: SecurityProfile,
}

async fn apply_profile(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ProfileBody>,
) -> ApiResult<Json<JsonValue>> {
    state.approval.apply_security_profile(body.profile).await?;
    state.email_policy.invalidate();
    state
        .logs
        .record_activity("settings", "security_profile", Some(&ctx.username), None, None, None, None)
        .await;
    Ok(Json(json!({"detail": "Profile applied"})))
}
