//! The MCP gateway: one endpoint multiplexing management and tool calls
//!
//! `POST /mcp` accepts JSON-RPC 2.0. `tools/list` merges the built-in
//! management tools with the sandbox's registered tools (the management
//! set survives a sandbox outage); `tools/call` routes `mcpbox_*` names
//! to the management dispatcher and everything else to the sandbox, after
//! the approval gate. Every invocation emits a redacted execution log
//! correlated by request id.

pub mod jsonrpc;
pub mod management;

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};
use uuid::Uuid;

use mcpbox_core::setting::keys;

use crate::error::ApiError;
use crate::services::execution_log::ExecutionRecord;
use crate::state::AppState;
use jsonrpc::{JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, METHOD_NOT_FOUND, PARSE_ERROR};

/// Gateway protocol version offered to clients.
const PROTOCOL_VERSION: &str = "2025-03-26";

fn ct_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authenticate a gateway call.
///
/// With a service token configured, remote mode is active: the bearer
/// must match, and an upstream identity header is checked against the
/// email policy. Without one, the panel is local-only and calls pass.
/// Failures never reveal which check failed.
async fn authenticate(state: &Arc<AppState>, headers: &HeaderMap) -> Result<(), ApiError> {
    let service_token = match state.settings.get(keys::SERVICE_TOKEN).await {
        Ok(Some(setting)) if setting.encrypted => match setting.value {
            Some(ciphertext) => Some(
                mcpbox_crypto::decrypt_b64(&state.encryption_key, &ciphertext, "service_token")
                    .map_err(|e| ApiError::internal(format!("service token unreadable: {e}")))?,
            ),
            None => None,
        },
        Ok(Some(setting)) => setting.value,
        Ok(None) => None,
        Err(e) => return Err(ApiError::internal(e.to_string())),
    };

    let Some(expected) = service_token else {
        // Local-only mode
        return Ok(());
    };

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if !ct_eq(presented, &expected) {
        return Err(ApiError::unauthorized("service token mismatch"));
    }

    // Remote callers also pass the email policy
    let email = headers
        .get("cf-access-authenticated-user-email")
        .and_then(|v| v.to_str().ok());
    if email.is_some() {
        let (allowed, reason) = state.email_policy.check_email(email).await;
        if !allowed {
            return Err(ApiError::unauthorized(reason));
        }
    }
    Ok(())
}

/// `POST /mcp` handler.
pub async fn handle_mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(err) = authenticate(&state, &headers).await {
        return err.into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "unparseable JSON-RPC request");
            return Json(JsonRpcResponse::error(None, PARSE_ERROR, "Parse error"))
                .into_response();
        }
    };

    if request.is_notification() {
        // Notifications get no response body
        return axum::http::StatusCode::ACCEPTED.into_response();
    }

    let id = request.id.clone();
    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {
                    "name": "mcpbox",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => JsonRpcResponse::result(id, json!({})),
        "tools/list" => handle_tools_list(&state, id).await,
        "tools/call" => handle_tools_call(&state, &headers, id, request.params).await,
        other => {
            debug!(method = other, "unknown JSON-RPC method");
            JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
        }
    };
    Json(response).into_response()
}

async fn handle_tools_list(state: &Arc<AppState>, id: Option<JsonValue>) -> JsonRpcResponse {
    let mut tools = management::management_tool_definitions();

    // Sandbox outage still leaves the management tools usable
    match state.sandbox.list_tools().await {
        Ok(sandbox_tools) => tools.extend(sandbox_tools),
        Err(e) => warn!(error = %e, "sandbox tools/list failed; serving management tools only"),
    }

    JsonRpcResponse::result(id, json!({"tools": tools}))
}

async fn handle_tools_call(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    id: Option<JsonValue>,
    params: Option<JsonValue>,
) -> JsonRpcResponse {
    let params = params.unwrap_or(json!({}));
    let Some(tool_name) = params.get("name").and_then(JsonValue::as_str) else {
        return JsonRpcResponse::error(id, jsonrpc::INVALID_PARAMS, "Missing tool name");
    };
    let tool_name = tool_name.to_string();
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let request_id = Uuid::new_v4().simple().to_string();
    let caller = headers
        .get("cf-access-authenticated-user-email")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
        .to_string();

    let started = std::time::Instant::now();

    // Management tools resolve against the database
    if tool_name.starts_with("mcpbox_") {
        let result = management::dispatch(state, &tool_name, &arguments, &caller).await;
        let success = result["isError"] != json!(true);
        state
            .logs
            .record_execution(ExecutionRecord {
                server_id: None,
                tool_id: None,
                tool_name: tool_name.clone(),
                input_args: Some(arguments),
                result: Some(result["content"][0]["text"].as_str().unwrap_or("").to_string()),
                stdout: None,
                error: None,
                success,
                duration_ms: started.elapsed().as_millis() as i64,
                executed_by: Some(caller),
                request_id: Some(request_id),
            })
            .await;
        return JsonRpcResponse::result(id, result);
    }

    // User tools: approval gate, then the sandbox
    let resolved = match state.approval.tools().find_by_full_name(&tool_name).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, tool = %tool_name, "tool resolution failed");
            return JsonRpcResponse::error(id, INTERNAL_ERROR, "Internal error");
        }
    };
    let Some((tool, _server_name)) = resolved else {
        return JsonRpcResponse::result(
            id,
            json!({
                "content": [{"type": "text", "text": format!("Unknown tool: {tool_name}")}],
                "isError": true,
            }),
        );
    };

    if !tool.enabled {
        return JsonRpcResponse::result(
            id,
            json!({
                "content": [{"type": "text", "text": format!("Tool '{tool_name}' is disabled")}],
                "isError": true,
            }),
        );
    }
    if !tool.approval_status.is_executable() {
        return JsonRpcResponse::result(
            id,
            json!({
                "content": [{"type": "text", "text": format!(
                    "Tool '{tool_name}' is not approved for execution (status: {})",
                    tool.approval_status
                )}],
                "isError": true,
            }),
        );
    }

    match state.sandbox.call_tool(&tool_name, &arguments).await {
        Ok(outcome) => {
            let success = outcome["success"] == json!(true)
                && outcome.get("is_error") != Some(&json!(true));
            let rendered = render_sandbox_result(&outcome);
            state
                .logs
                .record_execution(ExecutionRecord {
                    server_id: Some(tool.server_id),
                    tool_id: Some(tool.id),
                    tool_name: tool_name.clone(),
                    input_args: Some(arguments),
                    result: Some(rendered.clone()),
                    stdout: outcome
                        .get("stdout")
                        .and_then(JsonValue::as_str)
                        .map(String::from),
                    error: outcome
                        .get("error")
                        .and_then(JsonValue::as_str)
                        .map(String::from),
                    success,
                    duration_ms: outcome
                        .get("duration_ms")
                        .and_then(JsonValue::as_i64)
                        .unwrap_or_else(|| started.elapsed().as_millis() as i64),
                    executed_by: Some(caller),
                    request_id: Some(request_id),
                })
                .await;

            JsonRpcResponse::result(
                id,
                json!({
                    "content": [{"type": "text", "text": rendered}],
                    "isError": !success,
                }),
            )
        }
        Err(e) => {
            // Full detail stays in the logs; the client sees generic text
            warn!(error = %e, tool = %tool_name, request_id = %request_id, "sandbox call failed");
            state
                .logs
                .record_execution(ExecutionRecord {
                    server_id: Some(tool.server_id),
                    tool_id: Some(tool.id),
                    tool_name,
                    input_args: Some(arguments),
                    result: None,
                    stdout: None,
                    error: Some(e.to_string()),
                    success: false,
                    duration_ms: started.elapsed().as_millis() as i64,
                    executed_by: Some(caller),
                    request_id: Some(request_id),
                })
                .await;
            JsonRpcResponse::error(id, INTERNAL_ERROR, "Tool execution is temporarily unavailable")
        }
    }
}

/// Render a sandbox outcome as the text surfaced to the client.
fn render_sandbox_result(outcome: &JsonValue) -> String {
    if outcome["success"] == json!(true) {
        match outcome.get("result") {
            Some(JsonValue::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    } else {
        outcome
            .get("error")
            .and_then(JsonValue::as_str)
            .unwrap_or("Tool execution failed")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_compare() {
        assert!(ct_eq("token", "token"));
        assert!(!ct_eq("token", "Token"));
        assert!(!ct_eq("token", "token2"));
        assert!(!ct_eq("", "x"));
        assert!(ct_eq("", ""));
    }

    #[test]
    fn sandbox_result_rendering() {
        assert_eq!(
            render_sandbox_result(&json!({"success": true, "result": 6})),
            "6"
        );
        assert_eq!(
            render_sandbox_result(&json!({"success": true, "result": "hello"})),
            "hello"
        );
        assert_eq!(
            render_sandbox_result(&json!({"success": false, "error": "boom"})),
            "boom"
        );
        assert_eq!(
            render_sandbox_result(&json!({"success": false})),
            "Tool execution failed"
        );
    }
}
