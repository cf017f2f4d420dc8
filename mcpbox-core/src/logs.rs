//! Append-only audit entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A structured activity row for admin actions and gateway calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub category: String,
    pub action: String,
    pub actor: Option<String>,
    pub server_id: Option<Uuid>,
    pub tool_id: Option<Uuid>,
    /// Correlates rows emitted by the same request.
    pub request_id: Option<String>,
    pub detail: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// An execution record for a single tools/call, redacted and truncated
/// before it reaches storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionLog {
    pub id: Uuid,
    pub server_id: Option<Uuid>,
    pub tool_id: Option<Uuid>,
    pub tool_name: String,
    /// Arguments with sensitive keys masked.
    pub input_args: Option<Value>,
    /// Truncated to [`crate::redact::RESULT_CAP_BYTES`].
    pub result: Option<String>,
    pub stdout: Option<String>,
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: i64,
    pub executed_by: Option<String>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
