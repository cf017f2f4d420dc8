//! Loopback HTTP service fronting the sandbox
//!
//! The management plane is the only caller; every request must present
//! the shared `X-API-Key`. A key shorter than 32 characters disables the
//! service entirely (503 on every request), and with
//! `require_resource_limits` set, missing RLIMITs do the same for
//! everything except `/health`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use mcpbox_config::{domains::security::SANDBOX_API_KEY_MIN_LEN, SandboxConfig};

use crate::executor::{ExecutionRequest, Executor};
use crate::limits::{validate_resource_limits, ResourceLimitStatus};
use crate::mcp::McpSessionPool;
use crate::registry::{RegisteredServer, ToolRegistry};

/// Shared state of the sandbox service.
pub struct SandboxState {
    pub registry: ToolRegistry,
    pub executor: Executor,
    pub pool: McpSessionPool,
    pub api_key: String,
    pub config: SandboxConfig,
    pub limit_status: ResourceLimitStatus,
}

impl SandboxState {
    pub fn new(config: SandboxConfig, api_key: String, limit_status: ResourceLimitStatus) -> Self {
        Self {
            registry: ToolRegistry::new(),
            executor: Executor::new(config.max_output_size),
            pool: McpSessionPool::default(),
            api_key,
            config,
            limit_status,
        }
    }

    fn limits_error(&self) -> Option<String> {
        validate_resource_limits(&self.config, &self.limit_status)
            .err()
            .map(|e| e.to_string())
    }
}

/// Build the sandbox router.
pub fn router(state: Arc<SandboxState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .route("/call_tool", post(call_tool))
        .route("/tools", get(list_tools))
        .route("/register_server", post(register_server))
        .route("/unregister_server", post(unregister_server))
        .route("/update_server_secrets", post(update_server_secrets))
        .route("/discover_external_tools", post(discover_external_tools))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

/// Constant-time string comparison for the shared key.
fn ct_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn require_api_key(
    State(state): State<Arc<SandboxState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    // A weak shared secret disables the whole service
    if state.api_key.len() < SANDBOX_API_KEY_MIN_LEN {
        warn!("sandbox API key is shorter than the required minimum; refusing to serve");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "sandbox API key is not configured securely"})),
        )
            .into_response();
    }

    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !ct_eq(presented, &state.api_key) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid or missing API key"})),
        )
            .into_response();
    }

    // With limits required but unset, only /health may answer
    if request.uri().path() != "/health" {
        if let Some(message) = state.limits_error() {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": message})),
            )
                .into_response();
        }
    }

    next.run(request).await
}

async fn health(State(state): State<Arc<SandboxState>>) -> Json<JsonValue> {
    let pool_stats = state.pool.stats().await;
    Json(json!({
        "status": if state.limits_error().is_none() { "ok" } else { "degraded" },
        "registered_servers": state.registry.server_count(),
        "registered_tools": state.registry.tool_count(),
        "resource_limits": state.limit_status,
        "resource_limit_error": state.limits_error(),
        "session_pool": pool_stats,
    }))
}

#[derive(Deserialize)]
struct ExecuteBody {
    code: String,
    #[serde(default)]
    arguments: JsonValue,
    helper_code: Option<String>,
    allowed_modules: Option<Vec<String>>,
    allowed_hosts: Option<Vec<String>>,
    #[serde(default)]
    secrets: HashMap<String, String>,
    timeout_ms: Option<u64>,
}

async fn execute(
    State(state): State<Arc<SandboxState>>,
    Json(body): Json<ExecuteBody>,
) -> Json<JsonValue> {
    let timeout = Duration::from_millis(
        body.timeout_ms
            .unwrap_or(state.config.default_timeout.as_millis() as u64),
    );
    let request = ExecutionRequest {
        source_code: body.code,
        arguments: body.arguments,
        helper_code: body.helper_code,
        allowed_modules: body.allowed_modules,
        allowed_hosts: body.allowed_hosts,
        secrets: body.secrets,
        timeout,
    };
    let result = state.executor.execute(request).await;
    Json(serde_json::to_value(result).unwrap_or_else(|_| json!({"success": false})))
}

#[derive(Deserialize)]
struct CallToolBody {
    tool_name: String,
    #[serde(default)]
    arguments: JsonValue,
}

async fn call_tool(
    State(state): State<Arc<SandboxState>>,
    Json(body): Json<CallToolBody>,
) -> Json<JsonValue> {
    let Some((server, tool)) = state.registry.resolve(&body.tool_name) else {
        return Json(json!({
            "success": false,
            "error": format!("Tool not found: {}", body.tool_name),
        }));
    };

    // Passthrough tools proxy to the external server through the pool
    if let Some(source_id) = &tool.external_source_id {
        let Some(source) = server
            .external_sources
            .iter()
            .find(|s| &s.source_id == source_id)
        else {
            return Json(json!({
                "success": false,
                "error": "External source for this tool is not registered",
            }));
        };
        let external_name = tool.external_tool_name.as_deref().unwrap_or(&tool.name);
        let result = state
            .pool
            .call_tool(
                &source.url,
                external_name,
                &body.arguments,
                Some(&source.auth_headers),
            )
            .await;
        return Json(result);
    }

    let Some(code) = tool.source_code.clone() else {
        return Json(json!({
            "success": false,
            "error": "Tool has no source code defined",
        }));
    };

    let request = ExecutionRequest {
        source_code: code,
        arguments: body.arguments,
        helper_code: server.helper_code.clone(),
        allowed_modules: server.allowed_modules.clone(),
        allowed_hosts: server.allowed_hosts.clone(),
        secrets: server.secrets.clone(),
        timeout: Duration::from_millis(tool.timeout_ms),
    };
    let result = state.executor.execute(request).await;
    Json(serde_json::to_value(result).unwrap_or_else(|_| json!({"success": false})))
}

async fn list_tools(State(state): State<Arc<SandboxState>>) -> Json<JsonValue> {
    Json(json!({"tools": state.registry.list_tools()}))
}

async fn register_server(
    State(state): State<Arc<SandboxState>>,
    Json(server): Json<RegisteredServer>,
) -> Json<JsonValue> {
    let count = state.registry.register_server(server);
    Json(json!({"success": true, "tools_registered": count}))
}

#[derive(Deserialize)]
struct ServerIdBody {
    server_id: String,
}

async fn unregister_server(
    State(state): State<Arc<SandboxState>>,
    Json(body): Json<ServerIdBody>,
) -> Json<JsonValue> {
    let removed = state.registry.unregister_server(&body.server_id);
    Json(json!({"success": true, "was_registered": removed}))
}

#[derive(Deserialize)]
struct UpdateSecretsBody {
    server_id: String,
    #[serde(default)]
    secrets: HashMap<String, String>,
}

async fn update_server_secrets(
    State(state): State<Arc<SandboxState>>,
    Json(body): Json<UpdateSecretsBody>,
) -> Json<JsonValue> {
    let updated = state
        .registry
        .update_server_secrets(&body.server_id, body.secrets);
    if updated {
        info!(server_id = %body.server_id, "updated server secrets");
        Json(json!({"success": true}))
    } else {
        Json(json!({"success": false, "error": "Server not registered"}))
    }
}

#[derive(Deserialize)]
struct DiscoverBody {
    url: String,
    #[serde(default)]
    auth_headers: HashMap<String, String>,
}

async fn discover_external_tools(
    State(state): State<Arc<SandboxState>>,
    Json(body): Json<DiscoverBody>,
) -> Json<JsonValue> {
    let result = state
        .pool
        .discover_tools(&body.url, Some(&body.auth_headers))
        .await;
    Json(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn good_limits() -> ResourceLimitStatus {
        ResourceLimitStatus {
            memory_limit_set: true,
            cpu_limit_set: true,
            fd_limit_set: true,
            ..Default::default()
        }
    }

    fn test_state(api_key: &str) -> Arc<SandboxState> {
        Arc::new(SandboxState::new(
            SandboxConfig::default(),
            api_key.to_string(),
            good_limits(),
        ))
    }

    fn valid_key() -> String {
        "k".repeat(40)
    }

    async fn body_json(response: Response) -> JsonValue {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn short_api_key_disables_the_service() {
        let app = router(test_state("short"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("X-API-Key", "short")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn missing_or_wrong_key_is_unauthorized() {
        let key = valid_key();
        let app = router(test_state(&key));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("X-API-Key", "w".repeat(40))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_reports_registry_counts() {
        let key = valid_key();
        let state = test_state(&key);
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("X-API-Key", &key)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["registered_servers"], 0);
    }

    #[tokio::test]
    async fn missing_limits_block_everything_but_health() {
        let key = valid_key();
        let state = Arc::new(SandboxState::new(
            SandboxConfig::default(),
            key.clone(),
            ResourceLimitStatus {
                memory_limit_set: true,
                cpu_limit_set: false,
                fd_limit_set: true,
                ..Default::default()
            },
        ));
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("X-API-Key", &key)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("X-API-Key", &key)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"code": "async def main():\n    return 1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn execute_endpoint_runs_code() {
        let key = valid_key();
        let app = router(test_state(&key));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("X-API-Key", &key)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"code": "async def main(x: int):\n    return x * 2", "arguments": {"x": 21}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"], 42);
    }

    #[tokio::test]
    async fn register_then_call_then_unregister() {
        let key = valid_key();
        let app = router(test_state(&key));

        let register = json!({
            "server_id": "s1",
            "server_name": "demo",
            "helper_code": null,
            "allowed_modules": null,
            "allowed_hosts": null,
            "secrets": {},
            "external_sources": [],
            "tools": {
                "echo": {
                    "name": "echo",
                    "description": "echo input",
                    "parameters": {"type": "object"},
                    "source_code": "async def main(msg: str):\n    return msg",
                    "external_tool_name": null,
                    "external_source_id": null,
                    "timeout_ms": 5000
                }
            }
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register_server")
                    .header("X-API-Key", &key)
                    .header("content-type", "application/json")
                    .body(Body::from(register.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["tools_registered"], 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/call_tool")
                    .header("X-API-Key", &key)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"tool_name": "demo__echo", "arguments": {"msg": "hi"}}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"], "hi");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/unregister_server")
                    .header("X-API-Key", &key)
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"server_id": "s1"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["was_registered"], true);
    }

    #[tokio::test]
    async fn call_unknown_tool_reports_not_found() {
        let key = valid_key();
        let app = router(test_state(&key));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/call_tool")
                    .header("X-API-Key", &key)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"tool_name": "nope__missing", "arguments": {}}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}
