//! Audit log repository
//!
//! Append-only writers for the activity and execution streams, plus the
//! retention eviction used by the cleanup loop. Redaction happens before
//! rows reach this layer.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use mcpbox_core::{ActivityLog, ToolExecutionLog};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::repositories::{get_opt_json, get_opt_uuid, get_uuid};

#[derive(Clone)]
pub struct LogRepo {
    db: Database,
}

impl LogRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn map_activity(row: &SqliteRow) -> StorageResult<ActivityLog> {
        Ok(ActivityLog {
            id: get_uuid(row, "id")?,
            category: row.try_get("category")?,
            action: row.try_get("action")?,
            actor: row.try_get("actor")?,
            server_id: get_opt_uuid(row, "server_id")?,
            tool_id: get_opt_uuid(row, "tool_id")?,
            request_id: row.try_get("request_id")?,
            detail: get_opt_json(row, "detail")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_execution(row: &SqliteRow) -> StorageResult<ToolExecutionLog> {
        Ok(ToolExecutionLog {
            id: get_uuid(row, "id")?,
            server_id: get_opt_uuid(row, "server_id")?,
            tool_id: get_opt_uuid(row, "tool_id")?,
            tool_name: row.try_get("tool_name")?,
            input_args: get_opt_json(row, "input_args")?,
            result: row.try_get("result")?,
            stdout: row.try_get("stdout")?,
            error: row.try_get("error")?,
            success: row.try_get("success")?,
            duration_ms: row.try_get("duration_ms")?,
            executed_by: row.try_get("executed_by")?,
            request_id: row.try_get("request_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn insert_activity(&self, log: &ActivityLog) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO activity_logs
             (id, category, action, actor, server_id, tool_id, request_id, detail, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id.to_string())
        .bind(&log.category)
        .bind(&log.action)
        .bind(&log.actor)
        .bind(log.server_id.map(|id| id.to_string()))
        .bind(log.tool_id.map(|id| id.to_string()))
        .bind(&log.request_id)
        .bind(log.detail.as_ref().map(|d| d.to_string()))
        .bind(log.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_execution(&self, log: &ToolExecutionLog) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO tool_execution_logs
             (id, server_id, tool_id, tool_name, input_args, result, stdout, error, success,
              duration_ms, executed_by, request_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id.to_string())
        .bind(log.server_id.map(|id| id.to_string()))
        .bind(log.tool_id.map(|id| id.to_string()))
        .bind(&log.tool_name)
        .bind(log.input_args.as_ref().map(|a| a.to_string()))
        .bind(&log.result)
        .bind(&log.stdout)
        .bind(&log.error)
        .bind(log.success)
        .bind(log.duration_ms)
        .bind(&log.executed_by)
        .bind(&log.request_id)
        .bind(log.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn list_activity(
        &self,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ActivityLog>> {
        let rows = sqlx::query(
            "SELECT * FROM activity_logs ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Self::map_activity).collect()
    }

    pub async fn list_executions(
        &self,
        tool_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ToolExecutionLog>> {
        let rows = match tool_id {
            Some(tool_id) => {
                sqlx::query(
                    "SELECT * FROM tool_execution_logs WHERE tool_id = ?
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(tool_id.to_string())
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM tool_execution_logs ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
        };
        rows.iter().map(Self::map_execution).collect()
    }

    /// Retention eviction: delete audit rows older than the cutoff.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<(u64, u64)> {
        let activity = sqlx::query("DELETE FROM activity_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.db.pool())
            .await?
            .rows_affected();
        let executions = sqlx::query("DELETE FROM tool_execution_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.db.pool())
            .await?
            .rows_affected();
        Ok((activity, executions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test;
    use chrono::Duration;
    use serde_json::json;

    fn activity(action: &str, created_at: DateTime<Utc>) -> ActivityLog {
        ActivityLog {
            id: Uuid::new_v4(),
            category: "gateway".to_string(),
            action: action.to_string(),
            actor: Some("admin".to_string()),
            server_id: None,
            tool_id: None,
            request_id: Some("req-1".to_string()),
            detail: Some(json!({"note": action})),
            created_at,
        }
    }

    #[tokio::test]
    async fn insert_and_list_newest_first() {
        let repo = LogRepo::new(connect_test().await);
        let old = Utc::now() - Duration::hours(2);
        repo.insert_activity(&activity("first", old)).await.unwrap();
        repo.insert_activity(&activity("second", Utc::now())).await.unwrap();

        let logs = repo.list_activity(10, 0).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, "second");
        assert_eq!(logs[1].detail.as_ref().unwrap()["note"], "first");
    }

    #[tokio::test]
    async fn retention_deletes_only_old_rows() {
        let repo = LogRepo::new(connect_test().await);
        repo.insert_activity(&activity("old", Utc::now() - Duration::days(40)))
            .await
            .unwrap();
        repo.insert_activity(&activity("new", Utc::now())).await.unwrap();

        let execution = ToolExecutionLog {
            id: Uuid::new_v4(),
            server_id: None,
            tool_id: None,
            tool_name: "weather__forecast".to_string(),
            input_args: Some(json!({"city": "Berlin"})),
            result: Some("ok".to_string()),
            stdout: None,
            error: None,
            success: true,
            duration_ms: 12,
            executed_by: None,
            request_id: None,
            created_at: Utc::now() - Duration::days(40),
        };
        repo.insert_execution(&execution).await.unwrap();

        let (activity_deleted, exec_deleted) = repo
            .delete_older_than(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(activity_deleted, 1);
        assert_eq!(exec_deleted, 1);

        assert_eq!(repo.list_activity(10, 0).await.unwrap().len(), 1);
        assert!(repo.list_executions(None, 10, 0).await.unwrap().is_empty());
    }
}
