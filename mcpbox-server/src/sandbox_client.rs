//! Client for the loopback sandbox service
//!
//! All calls carry the shared `X-API-Key` and run behind the `sandbox`
//! circuit breaker; transient failures retry with backoff. When the
//! circuit is open the gateway fails fast instead of piling requests onto
//! a dead sandbox.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tracing::debug;

use mcpbox_resilience::{
    retry_with_breaker, CircuitBreakerRegistry, RetryError, RetryPolicy, Retryable,
    RETRYABLE_STATUS_CODES,
};

/// Circuit name for sandbox calls, visible in the ops endpoints.
pub const SANDBOX_CIRCUIT: &str = "sandbox";

#[derive(Debug, thiserror::Error)]
pub enum SandboxClientError {
    #[error("sandbox unreachable: {0}")]
    Unreachable(String),

    #[error("sandbox request timed out")]
    Timeout,

    #[error("sandbox returned HTTP {status}")]
    Status { status: u16 },

    #[error("sandbox returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl Retryable for SandboxClientError {
    fn is_retryable(&self) -> bool {
        match self {
            SandboxClientError::Unreachable(_) | SandboxClientError::Timeout => true,
            SandboxClientError::Status { status } => RETRYABLE_STATUS_CODES.contains(status),
            SandboxClientError::InvalidResponse(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct SandboxClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    breakers: Arc<CircuitBreakerRegistry>,
    retry_policy: RetryPolicy,
}

impl SandboxClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(330))
                .build()
                .expect("reqwest client builds"),
            breakers,
            retry_policy: RetryPolicy::default(),
        }
    }

    async fn post(
        &self,
        path: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, RetryError<SandboxClientError>> {
        let breaker = self.breakers.get_or_create(SANDBOX_CIRCUIT);
        let url = format!("{}{}", self.base_url, path);
        retry_with_breaker(&self.retry_policy, &breaker, || async {
            debug!(%url, "calling sandbox");
            let response = self
                .http
                .post(&url)
                .header("X-API-Key", &self.api_key)
                .json(body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        SandboxClientError::Timeout
                    } else {
                        SandboxClientError::Unreachable(e.to_string())
                    }
                })?;

            let status = response.status().as_u16();
            if status >= 400 {
                return Err(SandboxClientError::Status { status });
            }
            response
                .json::<JsonValue>()
                .await
                .map_err(|e| SandboxClientError::InvalidResponse(e.to_string()))
        })
        .await
    }

    async fn get(
        &self,
        path: &str,
    ) -> Result<JsonValue, RetryError<SandboxClientError>> {
        let breaker = self.breakers.get_or_create(SANDBOX_CIRCUIT);
        let url = format!("{}{}", self.base_url, path);
        retry_with_breaker(&self.retry_policy, &breaker, || async {
            let response = self
                .http
                .get(&url)
                .header("X-API-Key", &self.api_key)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        SandboxClientError::Timeout
                    } else {
                        SandboxClientError::Unreachable(e.to_string())
                    }
                })?;
            let status = response.status().as_u16();
            if status >= 400 {
                return Err(SandboxClientError::Status { status });
            }
            response
                .json::<JsonValue>()
                .await
                .map_err(|e| SandboxClientError::InvalidResponse(e.to_string()))
        })
        .await
    }

    /// Replace a server's full registration.
    pub async fn register_server(
        &self,
        payload: &JsonValue,
    ) -> Result<JsonValue, RetryError<SandboxClientError>> {
        self.post("/register_server", payload).await
    }

    pub async fn unregister_server(
        &self,
        server_id: &str,
    ) -> Result<JsonValue, RetryError<SandboxClientError>> {
        self.post("/unregister_server", &json!({"server_id": server_id}))
            .await
    }

    pub async fn update_server_secrets(
        &self,
        server_id: &str,
        secrets: &HashMap<String, String>,
    ) -> Result<JsonValue, RetryError<SandboxClientError>> {
        self.post(
            "/update_server_secrets",
            &json!({"server_id": server_id, "secrets": secrets}),
        )
        .await
    }

    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: &JsonValue,
    ) -> Result<JsonValue, RetryError<SandboxClientError>> {
        self.post(
            "/call_tool",
            &json!({"tool_name": tool_name, "arguments": arguments}),
        )
        .await
    }

    pub async fn list_tools(&self) -> Result<Vec<JsonValue>, RetryError<SandboxClientError>> {
        let response = self.get("/tools").await?;
        Ok(response
            .get("tools")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn discover_external_tools(
        &self,
        url: &str,
        auth_headers: &HashMap<String, String>,
    ) -> Result<JsonValue, RetryError<SandboxClientError>> {
        self.post(
            "/discover_external_tools",
            &json!({"url": url, "auth_headers": auth_headers}),
        )
        .await
    }

    pub async fn health(&self) -> Result<JsonValue, RetryError<SandboxClientError>> {
        self.get("/health").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbox_resilience::CircuitBreakerConfig;

    #[test]
    fn transient_classification() {
        assert!(SandboxClientError::Timeout.is_retryable());
        assert!(SandboxClientError::Unreachable("refused".into()).is_retryable());
        assert!(SandboxClientError::Status { status: 502 }.is_retryable());
        assert!(!SandboxClientError::Status { status: 401 }.is_retryable());
        assert!(!SandboxClientError::InvalidResponse("junk".into()).is_retryable());
    }

    #[tokio::test]
    async fn open_circuit_fails_fast() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
        }));
        breakers.get_or_create(SANDBOX_CIRCUIT).record_failure();

        let client = SandboxClient::new("http://127.0.0.1:1", "k".repeat(40), breakers);
        let result = client.list_tools().await;
        assert!(matches!(result, Err(RetryError::CircuitOpen(_))));
    }
}
