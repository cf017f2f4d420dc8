//! MCP Streamable HTTP client
//!
//! No MCP SDK dependency: the protocol surface MCPbox needs (initialize,
//! tools/list, tools/call, session teardown) is small enough to speak
//! directly.

use std::collections::HashMap;
use std::time::Duration;

use mcpbox_resilience::{Retryable, RETRYABLE_STATUS_CODES};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};
use uuid::Uuid;

/// Protocol version offered in `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Versions accepted when the server negotiates down.
pub const MCP_FALLBACK_VERSIONS: &[&str] = &["2024-11-05"];

/// Errors talking to an external MCP server.
#[derive(Debug, thiserror::Error)]
pub enum McpClientError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Cloudflare interposed a browser challenge; retrying cannot help.
    #[error("blocked by a Cloudflare challenge")]
    CloudflareChallenge,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{method} failed: {message}")]
    Rpc { method: String, message: String },
}

impl Retryable for McpClientError {
    fn is_retryable(&self) -> bool {
        match self {
            McpClientError::Connection(_) | McpClientError::Timeout => true,
            McpClientError::Http { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            McpClientError::CloudflareChallenge
            | McpClientError::Protocol(_)
            | McpClientError::Rpc { .. } => false,
        }
    }
}

/// Client for one external MCP server endpoint.
pub struct McpClient {
    url: String,
    auth_headers: HashMap<String, String>,
    timeout: Duration,
    http: reqwest::Client,
    session_id: Option<String>,
    initialized: bool,
}

impl McpClient {
    pub fn new(url: impl Into<String>, auth_headers: HashMap<String, String>) -> Self {
        Self::with_timeout(url, auth_headers, Duration::from_secs(30))
    }

    pub fn with_timeout(
        url: impl Into<String>,
        auth_headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            auth_headers,
            timeout,
            http: reqwest::Client::new(),
            session_id: None,
            initialized: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                "Accept".to_string(),
                "application/json, text/event-stream".to_string(),
            ),
        ];
        for (key, value) in &self.auth_headers {
            headers.push((key.clone(), value.clone()));
        }
        if let Some(session_id) = &self.session_id {
            headers.push(("Mcp-Session-Id".to_string(), session_id.clone()));
        }
        headers
    }

    async fn send_request(&mut self, request: &JsonValue) -> Result<JsonValue, McpClientError> {
        let mut builder = self.http.post(&self.url).timeout(self.timeout).json(request);
        for (key, value) in self.request_headers() {
            builder = builder.header(key, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                McpClientError::Timeout
            } else {
                McpClientError::Connection(e.to_string())
            }
        })?;

        // Capture the session id the server assigns on initialize
        if let Some(session_id) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| McpClientError::Connection(e.to_string()))?;

        if status == 403 && body.contains("challenge-platform") {
            return Err(McpClientError::CloudflareChallenge);
        }
        if status >= 400 {
            return Err(McpClientError::Http {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        if content_type.contains("text/event-stream") {
            parse_sse_response(&body)
        } else {
            serde_json::from_str(&body)
                .map_err(|e| McpClientError::Protocol(format!("invalid JSON response: {e}")))
        }
    }

    /// Perform the MCP initialize handshake and send the (fire-and-forget)
    /// `notifications/initialized` notification.
    pub async fn initialize(&mut self) -> Result<JsonValue, McpClientError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "mcpbox",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });

        let response = self.send_request(&request).await?;
        if let Some(error) = response.get("error") {
            return Err(McpClientError::Rpc {
                method: "initialize".to_string(),
                message: error
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        let result = response.get("result").cloned().unwrap_or(json!({}));

        if let Some(version) = result.get("protocolVersion").and_then(JsonValue::as_str) {
            if version != MCP_PROTOCOL_VERSION && !MCP_FALLBACK_VERSIONS.contains(&version) {
                debug!(version, "server negotiated an unrecognised protocol version");
            }
        }

        // Best-effort notification; a failure here does not fail the session
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        let mut builder = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&notification);
        for (key, value) in self.request_headers() {
            builder = builder.header(key, value);
        }
        if let Err(e) = builder.send().await {
            debug!(error = %e, "initialized notification not delivered");
        }

        self.initialized = true;
        Ok(result)
    }

    /// List tools on the external server.
    pub async fn list_tools(&mut self) -> Result<Vec<JsonValue>, McpClientError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "tools/list",
            "params": {},
        });

        let response = self.send_request(&request).await?;
        if let Some(error) = response.get("error") {
            return Err(McpClientError::Rpc {
                method: "tools/list".to_string(),
                message: error
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Call a tool, flattening MCP text content into a single string.
    pub async fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: &JsonValue,
    ) -> Result<JsonValue, McpClientError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "tools/call",
            "params": {
                "name": tool_name,
                "arguments": arguments,
            },
        });

        let response = self.send_request(&request).await?;
        if let Some(error) = response.get("error") {
            return Ok(json!({
                "success": false,
                "error": error.get("message").and_then(JsonValue::as_str).unwrap_or("unknown error"),
            }));
        }

        let result = response.get("result").cloned().unwrap_or(json!({}));
        let text_parts: Vec<String> = result
            .get("content")
            .and_then(JsonValue::as_array)
            .map(|content| {
                content
                    .iter()
                    .filter(|item| item.get("type").and_then(JsonValue::as_str) == Some("text"))
                    .filter_map(|item| item.get("text").and_then(JsonValue::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "success": true,
            "result": if text_parts.is_empty() { result.clone() } else { json!(text_parts.join("\n")) },
            "is_error": result.get("isError").and_then(JsonValue::as_bool).unwrap_or(false),
        }))
    }

    /// Terminate the session server-side. Best effort.
    pub async fn close(&mut self) {
        if self.session_id.is_some() {
            let mut builder = self.http.delete(&self.url).timeout(self.timeout);
            for (key, value) in self.request_headers() {
                builder = builder.header(key, value);
            }
            if let Err(e) = builder.send().await {
                warn!(url = %self.url, error = %e, "session termination not delivered");
            }
        }
        self.session_id = None;
        self.initialized = false;
    }
}

/// Extract the first JSON-RPC result or error object from an SSE stream.
fn parse_sse_response(text: &str) -> Result<JsonValue, McpClientError> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data: ") {
            if let Ok(parsed) = serde_json::from_str::<JsonValue>(data) {
                if parsed.get("result").is_some() || parsed.get("error").is_some() {
                    return Ok(parsed);
                }
            }
        }
    }
    Err(McpClientError::Protocol(
        "no JSON-RPC result found in SSE response".to_string(),
    ))
}
