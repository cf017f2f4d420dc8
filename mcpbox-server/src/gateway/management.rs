//! Built-in management tools (`mcpbox_*`)
//!
//! Exposed through the same MCP gateway as user tools; they operate on
//! MCPbox's own state. Missing arguments produce `isError` content with a
//! user-visible message; internal failures map to a generic error so no
//! internal text leaks to the client.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use mcpbox_core::{ChangeSource, RequestStatus, ToolType};

use crate::error::ApiError;
use crate::services::approval::ToolInput;
use crate::state::AppState;

/// Tool definitions advertised by `tools/list`.
pub fn management_tool_definitions() -> Vec<JsonValue> {
    vec![
        tool_def(
            "mcpbox_list_servers",
            "List all configured servers with their status",
            json!({"type": "object", "properties": {}}),
        ),
        tool_def(
            "mcpbox_create_server",
            "Create a new server (a namespace for tools)",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Server name"},
                    "description": {"type": "string", "description": "Optional description"}
                },
                "required": ["name"]
            }),
        ),
        tool_def(
            "mcpbox_list_tools",
            "List the tools of a server with their approval status",
            json!({
                "type": "object",
                "properties": {
                    "server_id": {"type": "string", "description": "Server UUID"}
                },
                "required": ["server_id"]
            }),
        ),
        tool_def(
            "mcpbox_create_tool",
            "Create a tool from source code on a server; the tool enters review unless auto-approve is active",
            json!({
                "type": "object",
                "properties": {
                    "server_id": {"type": "string", "description": "Server UUID"},
                    "name": {"type": "string", "description": "Tool name (lowercase identifier)"},
                    "description": {"type": "string"},
                    "code": {"type": "string", "description": "Tool code with an async main() function"}
                },
                "required": ["server_id", "name", "code"]
            }),
        ),
        tool_def(
            "mcpbox_set_secret",
            "Set an encrypted key/value secret on a server",
            json!({
                "type": "object",
                "properties": {
                    "server_id": {"type": "string", "description": "Server UUID"},
                    "key": {"type": "string", "description": "Secret key name"},
                    "value": {"type": "string", "description": "Secret value"}
                },
                "required": ["server_id", "key", "value"]
            }),
        ),
        tool_def(
            "mcpbox_list_pending_approvals",
            "List tools, network hosts and modules waiting for review",
            json!({"type": "object", "properties": {}}),
        ),
        tool_def(
            "mcpbox_approve_tool",
            "Approve a tool for execution",
            json!({
                "type": "object",
                "properties": {
                    "tool_id": {"type": "string", "description": "Tool UUID"}
                },
                "required": ["tool_id"]
            }),
        ),
        tool_def(
            "mcpbox_reject_tool",
            "Reject a tool",
            json!({
                "type": "object",
                "properties": {
                    "tool_id": {"type": "string", "description": "Tool UUID"},
                    "reason": {"type": "string", "description": "Why the tool was rejected"}
                },
                "required": ["tool_id"]
            }),
        ),
        tool_def(
            "mcpbox_start_server",
            "Start a server: register its tools with the sandbox",
            json!({
                "type": "object",
                "properties": {
                    "server_id": {"type": "string", "description": "Server UUID"}
                },
                "required": ["server_id"]
            }),
        ),
        tool_def(
            "mcpbox_stop_server",
            "Stop a server: unregister its tools from the sandbox",
            json!({
                "type": "object",
                "properties": {
                    "server_id": {"type": "string", "description": "Server UUID"}
                },
                "required": ["server_id"]
            }),
        ),
        tool_def(
            "mcpbox_request_network_access",
            "Request approval for tools of a server to reach a network host",
            json!({
                "type": "object",
                "properties": {
                    "server_id": {"type": "string", "description": "Server UUID"},
                    "host": {"type": "string", "description": "Hostname to allow"},
                    "port": {"type": "integer", "description": "Optional port"},
                    "reason": {"type": "string", "description": "Why access is needed"},
                    "tool_id": {"type": "string", "description": "Originating tool UUID, when raised from a tool"}
                },
                "required": ["server_id", "host"]
            }),
        ),
        tool_def(
            "mcpbox_request_module",
            "Request approval for tools of a server to import a runtime module",
            json!({
                "type": "object",
                "properties": {
                    "server_id": {"type": "string", "description": "Server UUID"},
                    "module": {"type": "string", "description": "Module name"},
                    "reason": {"type": "string", "description": "Why the module is needed"},
                    "tool_id": {"type": "string", "description": "Originating tool UUID, when raised from a tool"}
                },
                "required": ["server_id", "module"]
            }),
        ),
    ]
}

fn tool_def(name: &str, description: &str, input_schema: JsonValue) -> JsonValue {
    json!({
        "name": name,
        "description": description,
        "inputSchema": input_schema,
    })
}

fn text_content(text: impl Into<String>) -> JsonValue {
    json!({
        "content": [{"type": "text", "text": text.into()}],
        "isError": false,
    })
}

fn error_content(text: impl Into<String>) -> JsonValue {
    json!({
        "content": [{"type": "text", "text": text.into()}],
        "isError": true,
    })
}

fn require_str<'a>(args: &'a JsonValue, key: &str) -> Result<&'a str, JsonValue> {
    args.get(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| error_content(format!("Missing required argument: {key}")))
}

fn require_uuid(args: &JsonValue, key: &str) -> Result<Uuid, JsonValue> {
    let raw = require_str(args, key)?;
    Uuid::parse_str(raw).map_err(|_| error_content(format!("Argument {key} is not a valid UUID")))
}

/// Map a service error to MCP content: validation text is user-visible,
/// anything internal becomes a generic message.
fn map_error(err: ApiError) -> JsonValue {
    match err {
        ApiError::Validation(message)
        | ApiError::NotFound(message)
        | ApiError::Conflict(message) => error_content(message),
        other => {
            tracing::error!(error = %other, "management tool failed");
            error_content("The operation failed due to an internal error")
        }
    }
}

/// Execute a management tool. `actor` is the audited identity.
pub async fn dispatch(
    state: &Arc<AppState>,
    name: &str,
    args: &JsonValue,
    actor: &str,
) -> JsonValue {
    match name {
        "mcpbox_list_servers" => match state.approval.servers().list().await {
            Ok(servers) => {
                let rows: Vec<JsonValue> = servers
                    .iter()
                    .map(|s| {
                        json!({
                            "id": s.id,
                            "name": s.name,
                            "status": s.status,
                            "network_mode": s.network_mode,
                        })
                    })
                    .collect();
                text_content(serde_json::to_string_pretty(&rows).unwrap_or_default())
            }
            Err(e) => map_error(e.into()),
        },

        "mcpbox_create_server" => {
            let name = match require_str(args, "name") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let description = args.get("description").and_then(JsonValue::as_str);
            match state.approval.servers().create(name, description).await {
                Ok(server) => text_content(format!("Created server '{}' ({})", server.name, server.id)),
                Err(e) => map_error(e.into()),
            }
        }

        "mcpbox_list_tools" => {
            let server_id = match require_uuid(args, "server_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match state.approval.tools().list_by_server(server_id).await {
                Ok(tools) => {
                    let rows: Vec<JsonValue> = tools
                        .iter()
                        .map(|t| {
                            json!({
                                "id": t.id,
                                "name": t.name,
                                "enabled": t.enabled,
                                "approval_status": t.approval_status,
                                "version": t.current_version,
                            })
                        })
                        .collect();
                    text_content(serde_json::to_string_pretty(&rows).unwrap_or_default())
                }
                Err(e) => map_error(e.into()),
            }
        }

        "mcpbox_create_tool" => {
            let server_id = match require_uuid(args, "server_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let name = match require_str(args, "name") {
                Ok(v) => v.to_string(),
                Err(e) => return e,
            };
            let code = match require_str(args, "code") {
                Ok(v) => v.to_string(),
                Err(e) => return e,
            };
            let input = ToolInput {
                name,
                description: args
                    .get("description")
                    .and_then(JsonValue::as_str)
                    .map(String::from),
                source_code: Some(code),
                timeout_ms: None,
                tool_type: ToolType::PythonCode,
                external_source_id: None,
                external_tool_name: None,
            };
            match state
                .approval
                .create_tool(server_id, input, ChangeSource::Manual)
                .await
            {
                Ok(tool) => text_content(format!(
                    "Created tool '{}' ({}), approval status: {}",
                    tool.name, tool.id, tool.approval_status
                )),
                Err(e) => map_error(e),
            }
        }

        "mcpbox_set_secret" => {
            let server_id = match require_uuid(args, "server_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let key = match require_str(args, "key") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let value = match require_str(args, "value") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match state.secrets.set(server_id, key, value, None).await {
                Ok(_) => {
                    // Live servers get the new secret immediately
                    if let Ok(secrets) = state.secrets.decrypted_for_injection(server_id).await {
                        let _ = state
                            .sandbox
                            .update_server_secrets(&server_id.to_string(), &secrets)
                            .await;
                    }
                    text_content(format!("Secret '{key}' set"))
                }
                Err(e) => map_error(e),
            }
        }

        "mcpbox_list_pending_approvals" => {
            let approvals = state.approval.approvals();
            let network = approvals
                .list_network_requests(Some(RequestStatus::Pending))
                .await
                .unwrap_or_default();
            let modules = approvals
                .list_module_requests(Some(RequestStatus::Pending))
                .await
                .unwrap_or_default();
            let summary = json!({
                "network_requests": network.iter().map(|r| json!({
                    "id": r.id, "host": r.host, "port": r.port, "server_id": r.server_id,
                })).collect::<Vec<_>>(),
                "module_requests": modules.iter().map(|r| json!({
                    "id": r.id, "module": r.module_name, "server_id": r.server_id,
                })).collect::<Vec<_>>(),
            });
            text_content(serde_json::to_string_pretty(&summary).unwrap_or_default())
        }

        "mcpbox_approve_tool" => {
            let tool_id = match require_uuid(args, "tool_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match state.approval.approve_tool(tool_id, actor).await {
                Ok(tool) => text_content(format!("Tool '{}' approved", tool.name)),
                Err(e) => map_error(e),
            }
        }

        "mcpbox_reject_tool" => {
            let tool_id = match require_uuid(args, "tool_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let reason = args.get("reason").and_then(JsonValue::as_str);
            match state.approval.reject_tool(tool_id, actor, reason).await {
                Ok(tool) => text_content(format!("Tool '{}' rejected", tool.name)),
                Err(e) => map_error(e),
            }
        }

        "mcpbox_start_server" => {
            let server_id = match require_uuid(args, "server_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match state.approval.start_server(server_id).await {
                Ok(count) => text_content(format!("Server started with {count} tools registered")),
                Err(e) => map_error(e),
            }
        }

        "mcpbox_stop_server" => {
            let server_id = match require_uuid(args, "server_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match state.approval.stop_server(server_id).await {
                Ok(()) => text_content("Server stopped"),
                Err(e) => map_error(e),
            }
        }

        "mcpbox_request_network_access" => {
            let server_id = match require_uuid(args, "server_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let host = match require_str(args, "host") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let tool_id = args
                .get("tool_id")
                .and_then(JsonValue::as_str)
                .and_then(|s| Uuid::parse_str(s).ok());
            let port = args.get("port").and_then(JsonValue::as_i64);
            let reason = args.get("reason").and_then(JsonValue::as_str);
            match state
                .approval
                .request_network_access(server_id, tool_id, host, port, reason, Some(actor))
                .await
            {
                Ok(request) => text_content(format!(
                    "Network access request {} created for {}; waiting for admin review",
                    request.id,
                    request.target()
                )),
                Err(e) => map_error(e),
            }
        }

        "mcpbox_request_module" => {
            let server_id = match require_uuid(args, "server_id") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let module = match require_str(args, "module") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let tool_id = args
                .get("tool_id")
                .and_then(JsonValue::as_str)
                .and_then(|s| Uuid::parse_str(s).ok());
            let reason = args.get("reason").and_then(JsonValue::as_str);
            match state
                .approval
                .request_module(server_id, tool_id, module, reason, Some(actor))
                .await
            {
                Ok(request) => text_content(format!(
                    "Module request {} created for '{}'; waiting for admin review",
                    request.id, request.module_name
                )),
                Err(e) => map_error(e),
            }
        }

        _ => error_content(format!("Unknown management tool: {name}")),
    }
}
