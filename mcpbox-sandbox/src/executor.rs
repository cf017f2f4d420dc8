//! Tool execution engine
//!
//! Runs one tool call end to end: static validation, helper + tool module
//! evaluation, `main()` invocation, and classification of every failure
//! into the sandbox error taxonomy. The interpreter's step budget handles
//! CPU-bound code; an outer `tokio` timeout covers time spent awaiting
//! the HTTP collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use mcpbox_http::{HostPolicy, SsrfHttpClient};

use crate::error::{ErrorKind, SandboxError};
use crate::pytool::interp::{ExecConfig, Interp, Interrupt, StdoutBuffer};
use crate::pytool::validate::{find_main, validate_source};

/// One execution request.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub arguments: JsonValue,
    pub helper_code: Option<String>,
    pub allowed_modules: Option<Vec<String>>,
    /// `None` ⇒ network-isolated; `Some` ⇒ allowlisted hostnames.
    pub allowed_hosts: Option<Vec<String>>,
    pub secrets: HashMap<String, String>,
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            source_code: source_code.into(),
            arguments,
            helper_code: None,
            allowed_modules: None,
            allowed_hosts: None,
            secrets: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one execution. Failures still carry stdout and duration.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    fn failure(
        kind: ErrorKind,
        message: String,
        stdout: &StdoutBuffer,
        started: Instant,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message),
            error_kind: Some(kind),
            stdout: stdout.contents(),
            stdout_truncated: stdout.truncated(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// The execution engine. Stateless; policy arrives with each request.
pub struct Executor {
    max_output_size: usize,
}

impl Executor {
    pub fn new(max_output_size: usize) -> Self {
        Self { max_output_size }
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let stdout = StdoutBuffer::new(self.max_output_size);

        // Static validation rejects before anything runs
        let module = match validate_source(&request.source_code) {
            Ok(module) => module,
            Err(err) => {
                warn!(error = %err, "static validation rejected tool code");
                return ExecutionResult::failure(err.kind(), err.to_string(), &stdout, started);
            }
        };
        let helper_module = match &request.helper_code {
            Some(helper) => match crate::pytool::validate::scan_forbidden_patterns(helper)
                .and_then(|_| crate::pytool::parser::parse_module(helper))
            {
                Ok(module) => Some(module),
                Err(err) => {
                    warn!(error = %err, "helper code rejected");
                    return ExecutionResult::failure(
                        err.kind(),
                        format!("helper code: {err}"),
                        &stdout,
                        started,
                    );
                }
            },
            None => None,
        };
        let main = find_main(&module).expect("validated module has main");

        let http = self.build_http_client(&request);
        let config = ExecConfig {
            timeout: request.timeout,
            max_output: self.max_output_size,
            allowed_modules: request
                .allowed_modules
                .as_ref()
                .map(|modules| modules.iter().cloned().collect::<HashSet<String>>()),
            secrets: request.secrets.clone(),
        };

        let mut interp = Interp::new(config, stdout.clone(), http);

        // The interpreter checks its own deadline between steps; this outer
        // timeout covers time parked on awaited I/O.
        let outcome = tokio::time::timeout(request.timeout + Duration::from_millis(250), async {
            if let Some(helper) = &helper_module {
                interp.run_module(helper).await?;
            }
            interp.run_module(&module).await?;
            interp.call_main(main, &request.arguments).await
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Err(_elapsed) => ExecutionResult::failure(
                ErrorKind::Timeout,
                SandboxError::Timeout {
                    timeout_ms: request.timeout.as_millis() as u64,
                }
                .to_string(),
                &stdout,
                started,
            ),
            Ok(Err(Interrupt::Fatal(err))) => {
                ExecutionResult::failure(err.kind(), err.to_string(), &stdout, started)
            }
            Ok(Err(Interrupt::Exception(exc))) => {
                let kind = classify_exception(&exc.kind);
                ExecutionResult::failure(
                    kind,
                    format!("{}: {}", exc.kind, exc.message),
                    &stdout,
                    started,
                )
            }
            Ok(Ok(value)) => {
                let result = value.to_json();
                let rendered = result.to_string();
                if rendered.len() > self.max_output_size {
                    return ExecutionResult::failure(
                        ErrorKind::Truncation,
                        format!(
                            "result of {} bytes exceeds the output limit of {} bytes",
                            rendered.len(),
                            self.max_output_size
                        ),
                        &stdout,
                        started,
                    );
                }
                debug!(duration_ms, "tool execution succeeded");
                ExecutionResult {
                    success: true,
                    result: Some(result),
                    error: None,
                    error_kind: None,
                    stdout: stdout.contents(),
                    stdout_truncated: stdout.truncated(),
                    duration_ms,
                }
            }
        }
    }

    fn build_http_client(&self, request: &ExecutionRequest) -> Option<Arc<SsrfHttpClient>> {
        let policy = match &request.allowed_hosts {
            Some(hosts) => HostPolicy::Allowlist(hosts.clone()),
            None => return None,
        };
        Some(Arc::new(SsrfHttpClient::new(policy, request.timeout)))
    }
}

/// Map an uncaught tool exception onto the taxonomy.
fn classify_exception(kind: &str) -> ErrorKind {
    match kind {
        "ImportError" => ErrorKind::ImportDenied,
        "AttributeError" => ErrorKind::AttributeDenied,
        "SSRFError" => ErrorKind::HttpSsrf,
        "TimeoutError" => ErrorKind::Timeout,
        "ResourceError" | "RecursionError" => ErrorKind::ResourceExhaustion,
        _ => ErrorKind::ToolException,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> Executor {
        Executor::new(64 * 1024)
    }

    #[tokio::test]
    async fn successful_execution_returns_result_and_duration() {
        let result = executor()
            .execute(ExecutionRequest::new(
                "async def main(x: int) -> int:\n    return x * 2",
                json!({"x": 3}),
            ))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!(6)));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn static_rejection_names_the_pattern() {
        let result = executor()
            .execute(ExecutionRequest::new(
                "async def main():\n    return [].__class__.__mro__",
                json!({}),
            ))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::StaticRejection));
        assert!(result.error.unwrap().contains("__class__"));
    }

    #[tokio::test]
    async fn import_denied_is_classified() {
        let result = executor()
            .execute(ExecutionRequest::new(
                "import subprocess\n\nasync def main():\n    return 1",
                json!({}),
            ))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ImportDenied));
    }

    #[tokio::test]
    async fn ssrf_attempt_is_classified_with_empty_stdout() {
        let mut request = ExecutionRequest::new(
            "async def main(http):\n    return await http.get(\"http://169.254.169.254/latest/meta-data/\")",
            json!({}),
        );
        request.allowed_hosts = Some(vec!["169.254.169.254".to_string()]);
        let result = executor().execute(request).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::HttpSsrf));
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn isolated_network_blocks_http() {
        let result = executor()
            .execute(ExecutionRequest::new(
                "async def main(http):\n    return await http.get(\"http://example.com/\")",
                json!({}),
            ))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::HttpSsrf));
    }

    #[tokio::test]
    async fn tool_exception_keeps_stdout() {
        let result = executor()
            .execute(ExecutionRequest::new(
                "async def main():\n    print(\"before the crash\")\n    raise ValueError(\"boom\")",
                json!({}),
            ))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ToolException));
        assert_eq!(result.stdout, "before the crash\n");
        assert!(result.duration_ms < 10_000);
    }

    #[tokio::test]
    async fn cpu_bound_code_times_out() {
        let mut request = ExecutionRequest::new(
            "async def main():\n    i = 0\n    while True:\n        i += 1",
            json!({}),
        );
        request.timeout = Duration::from_millis(100);
        let result = executor().execute(request).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert!(result.duration_ms >= 100);
    }

    #[tokio::test]
    async fn helper_code_is_shared() {
        let mut request = ExecutionRequest::new(
            "async def main(x: int):\n    return shared_prefix(x)",
            json!({"x": 4}),
        );
        request.helper_code = Some("def shared_prefix(x):\n    return f\"id-{x}\"".to_string());
        let result = executor().execute(request).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!("id-4")));
    }

    #[tokio::test]
    async fn helper_code_is_also_pattern_checked() {
        let mut request = ExecutionRequest::new(
            "async def main():\n    return 1",
            json!({}),
        );
        request.helper_code = Some("x = [].__class__".to_string());
        let result = executor().execute(request).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::StaticRejection));
    }

    #[tokio::test]
    async fn secrets_reach_tool_code_via_os() {
        let mut request = ExecutionRequest::new(
            "import os\n\nasync def main():\n    return os.environ[\"TOKEN\"]",
            json!({}),
        );
        request.secrets.insert("TOKEN".to_string(), "t-123".to_string());
        let result = executor().execute(request).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!("t-123")));
    }

    #[tokio::test]
    async fn custom_module_allowlist_is_enforced() {
        let mut request = ExecutionRequest::new(
            "import math\n\nasync def main():\n    return math.floor(2.5)",
            json!({}),
        );
        request.allowed_modules = Some(vec!["json".to_string()]);
        let result = executor().execute(request).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ImportDenied));
    }

    #[tokio::test]
    async fn oversized_result_is_a_truncation_error() {
        let executor = Executor::new(256);
        let result = executor
            .execute(ExecutionRequest::new(
                "async def main():\n    return \"x\" * 1000",
                json!({}),
            ))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Truncation));
    }
}
