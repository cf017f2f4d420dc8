//! Tool and tool version entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{ApprovalStatus, ChangeSource, ToolType};

/// A tool owned by exactly one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tool_type: ToolType,
    /// Tool-language source; `None` for passthrough tools.
    pub source_code: Option<String>,
    /// JSON Schema derived from the `main()` signature.
    pub input_schema: Option<Value>,
    pub enabled: bool,
    pub timeout_ms: Option<i64>,
    /// Strictly monotonic; the [`ToolVersion`] with this number is the
    /// active state.
    pub current_version: i64,
    pub approval_status: ApprovalStatus,
    pub approval_requested_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub external_source_id: Option<Uuid>,
    pub external_tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tool {
    /// Gateway-facing name: `<server_name>__<tool_name>`.
    pub fn full_name(&self, server_name: &str) -> String {
        format!("{}__{}", server_name, self.name)
    }
}

/// Append-only snapshot of a tool, one row per version number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVersion {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub version_number: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub timeout_ms: Option<i64>,
    pub source_code: Option<String>,
    pub input_schema: Option<Value>,
    pub change_summary: Option<String>,
    pub change_source: ChangeSource,
    pub created_at: DateTime<Utc>,
}

/// One field-level difference between two tool versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVersionDiff {
    pub field: &'static str,
    pub old_value: Value,
    pub new_value: Value,
}

impl ToolVersion {
    /// Compare two versions field by field.
    pub fn diff(&self, other: &ToolVersion) -> Vec<ToolVersionDiff> {
        let mut differences = Vec::new();

        fn push(diffs: &mut Vec<ToolVersionDiff>, field: &'static str, old: Value, new: Value) {
            if old != new {
                diffs.push(ToolVersionDiff {
                    field,
                    old_value: old,
                    new_value: new,
                });
            }
        }

        push(
            &mut differences,
            "name",
            Value::String(self.name.clone()),
            Value::String(other.name.clone()),
        );
        push(
            &mut differences,
            "description",
            json_opt_str(&self.description),
            json_opt_str(&other.description),
        );
        push(
            &mut differences,
            "enabled",
            Value::Bool(self.enabled),
            Value::Bool(other.enabled),
        );
        push(
            &mut differences,
            "timeout_ms",
            self.timeout_ms.map(Value::from).unwrap_or(Value::Null),
            other.timeout_ms.map(Value::from).unwrap_or(Value::Null),
        );
        push(
            &mut differences,
            "source_code",
            json_opt_str(&self.source_code),
            json_opt_str(&other.source_code),
        );

        differences
    }
}

fn json_opt_str(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map(|s| Value::String(s.clone()))
        .unwrap_or(Value::Null)
}

/// Validate a tool name against `^[a-z][a-z0-9_]*$`.
pub fn validate_tool_name(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidToolName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_name_validation() {
        assert!(validate_tool_name("get_weather").is_ok());
        assert!(validate_tool_name("t2").is_ok());
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("GetWeather").is_err());
        assert!(validate_tool_name("2fast").is_err());
        assert!(validate_tool_name("has-dash").is_err());
        assert!(validate_tool_name("_leading").is_err());
    }

    fn version(number: i64, code: &str, enabled: bool) -> ToolVersion {
        ToolVersion {
            id: Uuid::new_v4(),
            tool_id: Uuid::new_v4(),
            version_number: number,
            name: "echo".to_string(),
            description: None,
            enabled,
            timeout_ms: None,
            source_code: Some(code.to_string()),
            input_schema: None,
            change_summary: None,
            change_source: ChangeSource::Manual,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn diff_reports_changed_fields_only() {
        let v1 = version(1, "async def main():\n    return 1", true);
        let v2 = version(2, "async def main():\n    return 2", false);

        let diffs = v1.diff(&v2);
        let fields: Vec<_> = diffs.iter().map(|d| d.field).collect();
        assert_eq!(fields, vec!["enabled", "source_code"]);
    }

    #[test]
    fn diff_of_identical_versions_is_empty() {
        let v = version(1, "async def main():\n    return 1", true);
        assert!(v.diff(&v).is_empty());
    }

    #[test]
    fn full_name_uses_double_underscore() {
        let tool = Tool {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            name: "forecast".to_string(),
            description: None,
            tool_type: ToolType::PythonCode,
            source_code: None,
            input_schema: None,
            enabled: true,
            timeout_ms: None,
            current_version: 1,
            approval_status: ApprovalStatus::Draft,
            approval_requested_at: None,
            approved_at: None,
            approved_by: None,
            rejection_reason: None,
            external_source_id: None,
            external_tool_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(tool.full_name("weather"), "weather__forecast");
    }
}
