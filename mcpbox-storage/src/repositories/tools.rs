//! Tool and tool-version repositories
//!
//! The version counter is bumped with a SQL expression so concurrent
//! writers cannot mint the same version number, and every state change
//! appends a snapshot row.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use mcpbox_core::{ApprovalStatus, ChangeSource, Tool, ToolType, ToolVersion};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::repositories::{get_enum, get_opt_json, get_opt_uuid, get_uuid};

/// Fields accepted when creating a tool.
#[derive(Debug, Clone)]
pub struct NewTool {
    pub name: String,
    pub description: Option<String>,
    pub tool_type: ToolType,
    pub source_code: Option<String>,
    pub input_schema: Option<JsonValue>,
    pub timeout_ms: Option<i64>,
    pub external_source_id: Option<Uuid>,
    pub external_tool_name: Option<String>,
    pub approval_status: ApprovalStatus,
    pub approved_by: Option<String>,
}

/// Fields accepted when updating a tool. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ToolChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub enabled: Option<bool>,
    pub timeout_ms: Option<Option<i64>>,
    pub source_code: Option<String>,
    pub input_schema: Option<JsonValue>,
    pub approval_status: Option<ApprovalStatus>,
    pub approved_at: Option<Option<DateTime<Utc>>>,
    pub approved_by: Option<Option<String>>,
}

#[derive(Clone)]
pub struct ToolRepo {
    db: Database,
}

impl ToolRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn map(row: &SqliteRow) -> StorageResult<Tool> {
        Ok(Tool {
            id: get_uuid(row, "id")?,
            server_id: get_uuid(row, "server_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            tool_type: get_enum::<ToolType>(row, "tool_type")?,
            source_code: row.try_get("source_code")?,
            input_schema: get_opt_json(row, "input_schema")?,
            enabled: row.try_get("enabled")?,
            timeout_ms: row.try_get("timeout_ms")?,
            current_version: row.try_get("current_version")?,
            approval_status: get_enum::<ApprovalStatus>(row, "approval_status")?,
            approval_requested_at: row.try_get("approval_requested_at")?,
            approved_at: row.try_get("approved_at")?,
            approved_by: row.try_get("approved_by")?,
            rejection_reason: row.try_get("rejection_reason")?,
            external_source_id: get_opt_uuid(row, "external_source_id")?,
            external_tool_name: row.try_get("external_tool_name")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn map_version(row: &SqliteRow) -> StorageResult<ToolVersion> {
        Ok(ToolVersion {
            id: get_uuid(row, "id")?,
            tool_id: get_uuid(row, "tool_id")?,
            version_number: row.try_get("version_number")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            enabled: row.try_get("enabled")?,
            timeout_ms: row.try_get("timeout_ms")?,
            source_code: row.try_get("source_code")?,
            input_schema: get_opt_json(row, "input_schema")?,
            change_summary: row.try_get("change_summary")?,
            change_source: get_enum::<ChangeSource>(row, "change_source")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Create a tool and its initial version row.
    pub async fn create(
        &self,
        server_id: Uuid,
        new_tool: NewTool,
        change_source: ChangeSource,
    ) -> StorageResult<Tool> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let approved_at = new_tool
            .approval_status
            .is_executable()
            .then_some(now);

        sqlx::query(
            "INSERT INTO tools
             (id, server_id, name, description, tool_type, source_code, input_schema, enabled,
              timeout_ms, current_version, approval_status, approved_at, approved_by,
              external_source_id, external_tool_name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, 1, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(&new_tool.name)
        .bind(&new_tool.description)
        .bind(new_tool.tool_type.as_str())
        .bind(&new_tool.source_code)
        .bind(
            new_tool
                .input_schema
                .as_ref()
                .map(|s| s.to_string()),
        )
        .bind(new_tool.timeout_ms)
        .bind(new_tool.approval_status.as_str())
        .bind(approved_at)
        .bind(&new_tool.approved_by)
        .bind(new_tool.external_source_id.map(|id| id.to_string()))
        .bind(&new_tool.external_tool_name)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "tool name"))?;

        let tool = self.get(id).await?;
        self.append_version(&tool, Some("Initial version"), change_source)
            .await?;
        Ok(tool)
    }

    pub async fn get(&self, id: Uuid) -> StorageResult<Tool> {
        let row = sqlx::query("SELECT * FROM tools WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("tool {id}")))?;
        Self::map(&row)
    }

    pub async fn list_by_server(&self, server_id: Uuid) -> StorageResult<Vec<Tool>> {
        let rows = sqlx::query("SELECT * FROM tools WHERE server_id = ? ORDER BY created_at ASC")
            .bind(server_id.to_string())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(Self::map).collect()
    }

    /// Resolve `server__tool` into the tool and its server name.
    pub async fn find_by_full_name(&self, full_name: &str) -> StorageResult<Option<(Tool, String)>> {
        let Some((server_name, tool_name)) = full_name.split_once("__") else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT t.*, s.name AS server_name FROM tools t
             JOIN servers s ON s.id = t.server_id
             WHERE s.name = ? AND t.name = ?",
        )
        .bind(server_name)
        .bind(tool_name)
        .fetch_optional(self.db.pool())
        .await?;
        match row {
            Some(row) => {
                let server_name: String = row.try_get("server_name")?;
                Ok(Some((Self::map(&row)?, server_name)))
            }
            None => Ok(None),
        }
    }

    /// Apply changes, bump `current_version` atomically, and append a
    /// snapshot row.
    pub async fn update(
        &self,
        id: Uuid,
        changes: ToolChanges,
        change_summary: Option<&str>,
        change_source: ChangeSource,
    ) -> StorageResult<Tool> {
        let current = self.get(id).await?;
        let name = changes.name.unwrap_or(current.name);
        let description = changes.description.unwrap_or(current.description);
        let enabled = changes.enabled.unwrap_or(current.enabled);
        let timeout_ms = changes.timeout_ms.unwrap_or(current.timeout_ms);
        let source_code = match changes.source_code {
            Some(code) => Some(code),
            None => current.source_code,
        };
        let input_schema = changes.input_schema.or(current.input_schema);
        let approval_status = changes.approval_status.unwrap_or(current.approval_status);
        let approved_at = changes.approved_at.unwrap_or(current.approved_at);
        let approved_by = changes.approved_by.unwrap_or(current.approved_by);

        sqlx::query(
            "UPDATE tools SET name = ?, description = ?, enabled = ?, timeout_ms = ?,
             source_code = ?, input_schema = ?, approval_status = ?, approved_at = ?, approved_by = ?,
             current_version = current_version + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(&name)
        .bind(&description)
        .bind(enabled)
        .bind(timeout_ms)
        .bind(&source_code)
        .bind(input_schema.as_ref().map(|s| s.to_string()))
        .bind(approval_status.as_str())
        .bind(approved_at)
        .bind(&approved_by)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "tool name"))?;

        let tool = self.get(id).await?;
        self.append_version(&tool, change_summary, change_source).await?;
        Ok(tool)
    }

    /// Change only the approval columns, without minting a new version.
    pub async fn set_approval(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        actor: Option<&str>,
        rejection_reason: Option<&str>,
    ) -> StorageResult<Tool> {
        let now = Utc::now();
        let (approved_at, approved_by) = match status {
            ApprovalStatus::Approved => (Some(now), actor),
            _ => (None, None),
        };
        let requested_at = matches!(status, ApprovalStatus::PendingReview).then_some(now);

        let result = sqlx::query(
            "UPDATE tools SET approval_status = ?, approved_at = ?, approved_by = ?,
             approval_requested_at = COALESCE(?, approval_requested_at),
             rejection_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(approved_at)
        .bind(approved_by)
        .bind(requested_at)
        .bind(rejection_reason)
        .bind(now)
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("tool {id}")));
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM tools WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_version(
        &self,
        tool: &Tool,
        change_summary: Option<&str>,
        change_source: ChangeSource,
    ) -> StorageResult<ToolVersion> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tool_versions
             (id, tool_id, version_number, name, description, enabled, timeout_ms, source_code,
              input_schema, change_summary, change_source, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(tool.id.to_string())
        .bind(tool.current_version)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(tool.enabled)
        .bind(tool.timeout_ms)
        .bind(&tool.source_code)
        .bind(tool.input_schema.as_ref().map(|s| s.to_string()))
        .bind(change_summary)
        .bind(change_source.as_str())
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "tool version"))?;
        self.get_version(tool.id, tool.current_version)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("version {}", tool.current_version)))
    }

    pub async fn list_versions(&self, tool_id: Uuid) -> StorageResult<Vec<ToolVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM tool_versions WHERE tool_id = ? ORDER BY version_number DESC",
        )
        .bind(tool_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Self::map_version).collect()
    }

    pub async fn get_version(
        &self,
        tool_id: Uuid,
        version_number: i64,
    ) -> StorageResult<Option<ToolVersion>> {
        let row = sqlx::query(
            "SELECT * FROM tool_versions WHERE tool_id = ? AND version_number = ?",
        )
        .bind(tool_id.to_string())
        .bind(version_number)
        .fetch_optional(self.db.pool())
        .await?;
        row.as_ref().map(Self::map_version).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test;
    use crate::repositories::servers::ServerRepo;
    use serde_json::json;

    fn new_tool(name: &str) -> NewTool {
        NewTool {
            name: name.to_string(),
            description: None,
            tool_type: ToolType::PythonCode,
            source_code: Some("async def main():\n    return 1".to_string()),
            input_schema: Some(json!({"type": "object", "properties": {}})),
            timeout_ms: None,
            external_source_id: None,
            external_tool_name: None,
            approval_status: ApprovalStatus::Draft,
            approved_by: None,
        }
    }

    async fn setup() -> (ToolRepo, Uuid) {
        let db = connect_test().await;
        let servers = ServerRepo::new(db.clone());
        let server = servers.create("weather", None).await.unwrap();
        (ToolRepo::new(db), server.id)
    }

    #[tokio::test]
    async fn create_starts_at_version_one() {
        let (repo, server_id) = setup().await;
        let tool = repo
            .create(server_id, new_tool("forecast"), ChangeSource::Manual)
            .await
            .unwrap();
        assert_eq!(tool.current_version, 1);

        let versions = repo.list_versions(tool.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_number, 1);
        assert_eq!(versions[0].change_summary.as_deref(), Some("Initial version"));
    }

    #[tokio::test]
    async fn updates_mint_strictly_increasing_versions() {
        let (repo, server_id) = setup().await;
        let tool = repo
            .create(server_id, new_tool("forecast"), ChangeSource::Manual)
            .await
            .unwrap();

        for i in 0..3 {
            repo.update(
                tool.id,
                ToolChanges {
                    source_code: Some(format!("async def main():\n    return {i}")),
                    ..Default::default()
                },
                Some("Updated source code"),
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        }

        let tool = repo.get(tool.id).await.unwrap();
        assert_eq!(tool.current_version, 4);

        let versions = repo.list_versions(tool.id).await.unwrap();
        let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn full_name_resolution() {
        let (repo, server_id) = setup().await;
        repo.create(server_id, new_tool("forecast"), ChangeSource::Manual)
            .await
            .unwrap();

        let (tool, server_name) = repo
            .find_by_full_name("weather__forecast")
            .await
            .unwrap()
            .expect("tool resolves");
        assert_eq!(tool.name, "forecast");
        assert_eq!(server_name, "weather");

        assert!(repo.find_by_full_name("weather__missing").await.unwrap().is_none());
        assert!(repo.find_by_full_name("no-separator").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approval_transitions() {
        let (repo, server_id) = setup().await;
        let tool = repo
            .create(server_id, new_tool("forecast"), ChangeSource::Manual)
            .await
            .unwrap();

        let approved = repo
            .set_approval(tool.id, ApprovalStatus::Approved, Some("admin"), None)
            .await
            .unwrap();
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("admin"));
        assert!(approved.approved_at.is_some());

        let rejected = repo
            .set_approval(tool.id, ApprovalStatus::Rejected, Some("admin"), Some("unsafe"))
            .await
            .unwrap();
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
        assert!(rejected.approved_at.is_none());
        assert_eq!(rejected.rejection_reason.as_deref(), Some("unsafe"));
    }

    #[tokio::test]
    async fn duplicate_tool_name_in_server_conflicts() {
        let (repo, server_id) = setup().await;
        repo.create(server_id, new_tool("forecast"), ChangeSource::Manual)
            .await
            .unwrap();
        assert!(matches!(
            repo.create(server_id, new_tool("forecast"), ChangeSource::Manual).await,
            Err(StorageError::Conflict(_))
        ));
    }
}
