//! Audit log pipeline
//!
//! Structured activity and execution writers with redaction and
//! truncation applied before anything reaches storage. Audit writes are
//! best-effort: a failed flush is logged, never propagated to the caller
//! whose request produced it.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use mcpbox_core::redact::{redact_args, truncate_output, RESULT_CAP_BYTES};
use mcpbox_core::{ActivityLog, ToolExecutionLog};
use mcpbox_storage::LogRepo;

/// Outcome of a tool invocation, as recorded.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub server_id: Option<Uuid>,
    pub tool_id: Option<Uuid>,
    pub tool_name: String,
    pub input_args: Option<JsonValue>,
    pub result: Option<String>,
    pub stdout: Option<String>,
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: i64,
    pub executed_by: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Clone)]
pub struct ExecutionLogService {
    repo: LogRepo,
}

impl ExecutionLogService {
    pub fn new(repo: LogRepo) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &LogRepo {
        &self.repo
    }

    /// Write an execution row with redacted args and truncated output.
    pub async fn record_execution(&self, record: ExecutionRecord) {
        let log = ToolExecutionLog {
            id: Uuid::new_v4(),
            server_id: record.server_id,
            tool_id: record.tool_id,
            tool_name: record.tool_name,
            input_args: record.input_args.as_ref().map(redact_args),
            result: record
                .result
                .as_deref()
                .map(|r| truncate_output(r, RESULT_CAP_BYTES)),
            stdout: record
                .stdout
                .as_deref()
                .map(|s| truncate_output(s, RESULT_CAP_BYTES)),
            error: record.error,
            success: record.success,
            duration_ms: record.duration_ms,
            executed_by: record.executed_by,
            request_id: record.request_id,
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.insert_execution(&log).await {
            warn!(error = %e, tool = %log.tool_name, "failed to write execution log");
        }
    }

    /// Write an activity row.
    pub async fn record_activity(
        &self,
        category: &str,
        action: &str,
        actor: Option<&str>,
        server_id: Option<Uuid>,
        tool_id: Option<Uuid>,
        request_id: Option<&str>,
        detail: Option<JsonValue>,
    ) {
        let log = ActivityLog {
            id: Uuid::new_v4(),
            category: category.to_string(),
            action: action.to_string(),
            actor: actor.map(String::from),
            server_id,
            tool_id,
            request_id: request_id.map(String::from),
            detail: detail.as_ref().map(redact_args),
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.insert_activity(&log).await {
            warn!(error = %e, action = %log.action, "failed to write activity log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbox_storage::db::connect_test;
    use serde_json::json;

    #[tokio::test]
    async fn execution_rows_are_redacted_and_truncated() {
        let repo = LogRepo::new(connect_test().await);
        let service = ExecutionLogService::new(repo.clone());

        service
            .record_execution(ExecutionRecord {
                server_id: None,
                tool_id: None,
                tool_name: "weather__forecast".to_string(),
                input_args: Some(json!({"city": "Berlin", "api_key": "sk-123"})),
                result: Some("r".repeat(20 * 1024)),
                stdout: Some("log line\n".to_string()),
                error: None,
                success: true,
                duration_ms: 42,
                executed_by: Some("svc-token".to_string()),
                request_id: Some("req-9".to_string()),
            })
            .await;

        let rows = repo.list_executions(None, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.input_args.as_ref().unwrap()["api_key"], "[REDACTED]");
        assert_eq!(row.input_args.as_ref().unwrap()["city"], "Berlin");
        let stored = row.result.as_ref().unwrap();
        assert!(stored.len() < 20 * 1024);
        assert!(stored.ends_with("[truncated]"));
        assert!(row.success);
        assert_eq!(row.duration_ms, 42);
    }

    #[tokio::test]
    async fn activity_detail_is_redacted() {
        let repo = LogRepo::new(connect_test().await);
        let service = ExecutionLogService::new(repo.clone());
        service
            .record_activity(
                "credential",
                "create",
                Some("admin"),
                None,
                None,
                None,
                Some(json!({"name": "github", "token": "t-1"})),
            )
            .await;

        let rows = repo.list_activity(10, 0).await.unwrap();
        assert_eq!(rows[0].detail.as_ref().unwrap()["token"], "[REDACTED]");
        assert_eq!(rows[0].detail.as_ref().unwrap()["name"], "github");
    }
}
