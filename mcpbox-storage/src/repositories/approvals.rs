//! Approval artefact repository (network-access and module requests)
//!
//! The partial unique indexes in the schema are the enforcement point for
//! A2: a second pending request for the same `(origin, target)` surfaces
//! as [`StorageError::Conflict`]. Terminal transitions guard on
//! `status = 'pending'` so a request is decided exactly once.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use mcpbox_core::{ModuleRequest, NetworkAccessRequest, RequestStatus};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::repositories::{get_enum, get_opt_uuid, get_uuid};

#[derive(Clone)]
pub struct ApprovalRepo {
    db: Database,
}

impl ApprovalRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn map_network(row: &SqliteRow) -> StorageResult<NetworkAccessRequest> {
        Ok(NetworkAccessRequest {
            id: get_uuid(row, "id")?,
            server_id: get_uuid(row, "server_id")?,
            tool_id: get_opt_uuid(row, "tool_id")?,
            host: row.try_get("host")?,
            port: row.try_get("port")?,
            reason: row.try_get("reason")?,
            status: get_enum::<RequestStatus>(row, "status")?,
            requested_by: row.try_get("requested_by")?,
            decided_by: row.try_get("decided_by")?,
            decided_at: row.try_get("decided_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_module(row: &SqliteRow) -> StorageResult<ModuleRequest> {
        Ok(ModuleRequest {
            id: get_uuid(row, "id")?,
            server_id: get_uuid(row, "server_id")?,
            tool_id: get_opt_uuid(row, "tool_id")?,
            module_name: row.try_get("module_name")?,
            reason: row.try_get("reason")?,
            status: get_enum::<RequestStatus>(row, "status")?,
            requested_by: row.try_get("requested_by")?,
            decided_by: row.try_get("decided_by")?,
            decided_at: row.try_get("decided_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    // === Network access requests ===

    pub async fn create_network_request(
        &self,
        server_id: Uuid,
        tool_id: Option<Uuid>,
        host: &str,
        port: Option<i64>,
        reason: Option<&str>,
        requested_by: Option<&str>,
    ) -> StorageResult<NetworkAccessRequest> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO network_access_requests
             (id, server_id, tool_id, host, port, reason, status, requested_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(tool_id.map(|id| id.to_string()))
        .bind(host)
        .bind(port)
        .bind(reason)
        .bind(requested_by)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "pending network request for this target"))?;
        self.get_network_request(id).await
    }

    pub async fn get_network_request(&self, id: Uuid) -> StorageResult<NetworkAccessRequest> {
        let row = sqlx::query("SELECT * FROM network_access_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("network request {id}")))?;
        Self::map_network(&row)
    }

    pub async fn list_network_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> StorageResult<Vec<NetworkAccessRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM network_access_requests WHERE status = ? ORDER BY created_at ASC",
                )
                .bind(status.as_str())
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM network_access_requests ORDER BY created_at ASC")
                    .fetch_all(self.db.pool())
                    .await?
            }
        };
        rows.iter().map(Self::map_network).collect()
    }

    /// Transition a pending request to a terminal state. Exactly-once: a
    /// request already decided is a conflict.
    pub async fn decide_network_request(
        &self,
        id: Uuid,
        status: RequestStatus,
        decided_by: &str,
    ) -> StorageResult<NetworkAccessRequest> {
        if !status.is_terminal() {
            return Err(StorageError::Conflict(
                "decision must be approved or rejected".to_string(),
            ));
        }
        let result = sqlx::query(
            "UPDATE network_access_requests SET status = ?, decided_by = ?, decided_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(decided_by)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            // Either unknown or already decided
            self.get_network_request(id).await?;
            return Err(StorageError::Conflict(format!(
                "network request {id} is not pending"
            )));
        }
        self.get_network_request(id).await
    }

    /// Approved hosts for a server, in approval order.
    pub async fn approved_hosts(&self, server_id: Uuid) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT host FROM network_access_requests
             WHERE server_id = ? AND status = 'approved' ORDER BY host ASC",
        )
        .bind(server_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("host").map_err(StorageError::from))
            .collect()
    }

    // === Module requests ===

    pub async fn create_module_request(
        &self,
        server_id: Uuid,
        tool_id: Option<Uuid>,
        module_name: &str,
        reason: Option<&str>,
        requested_by: Option<&str>,
    ) -> StorageResult<ModuleRequest> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO module_requests
             (id, server_id, tool_id, module_name, reason, status, requested_by, created_at)
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(tool_id.map(|id| id.to_string()))
        .bind(module_name)
        .bind(reason)
        .bind(requested_by)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "pending module request for this module"))?;
        self.get_module_request(id).await
    }

    pub async fn get_module_request(&self, id: Uuid) -> StorageResult<ModuleRequest> {
        let row = sqlx::query("SELECT * FROM module_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("module request {id}")))?;
        Self::map_module(&row)
    }

    pub async fn list_module_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> StorageResult<Vec<ModuleRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM module_requests WHERE status = ? ORDER BY created_at ASC")
                    .bind(status.as_str())
                    .fetch_all(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM module_requests ORDER BY created_at ASC")
                    .fetch_all(self.db.pool())
                    .await?
            }
        };
        rows.iter().map(Self::map_module).collect()
    }

    pub async fn decide_module_request(
        &self,
        id: Uuid,
        status: RequestStatus,
        decided_by: &str,
    ) -> StorageResult<ModuleRequest> {
        if !status.is_terminal() {
            return Err(StorageError::Conflict(
                "decision must be approved or rejected".to_string(),
            ));
        }
        let result = sqlx::query(
            "UPDATE module_requests SET status = ?, decided_by = ?, decided_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(decided_by)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            self.get_module_request(id).await?;
            return Err(StorageError::Conflict(format!(
                "module request {id} is not pending"
            )));
        }
        self.get_module_request(id).await
    }

    /// Approved modules for a server.
    pub async fn approved_modules(&self, server_id: Uuid) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT module_name FROM module_requests
             WHERE server_id = ? AND status = 'approved' ORDER BY module_name ASC",
        )
        .bind(server_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("module_name")
                    .map_err(StorageError::from)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test;
    use crate::repositories::servers::ServerRepo;
    use crate::repositories::tools::{NewTool, ToolRepo};
    use mcpbox_core::{ApprovalStatus, ChangeSource, ToolType};

    async fn setup() -> (ApprovalRepo, Uuid, Uuid) {
        let db = connect_test().await;
        let server = ServerRepo::new(db.clone()).create("s", None).await.unwrap();
        let tool = ToolRepo::new(db.clone())
            .create(
                server.id,
                NewTool {
                    name: "t".to_string(),
                    description: None,
                    tool_type: ToolType::PythonCode,
                    source_code: Some("async def main():\n    return 1".to_string()),
                    input_schema: None,
                    timeout_ms: None,
                    external_source_id: None,
                    external_tool_name: None,
                    approval_status: ApprovalStatus::Draft,
                    approved_by: None,
                },
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        (ApprovalRepo::new(db), server.id, tool.id)
    }

    #[tokio::test]
    async fn at_most_one_pending_llm_request_per_target() {
        let (repo, server_id, tool_id) = setup().await;
        repo.create_network_request(server_id, Some(tool_id), "api.example.com", Some(443), None, None)
            .await
            .unwrap();

        // Same target, same tool: conflict
        assert!(matches!(
            repo.create_network_request(server_id, Some(tool_id), "api.example.com", Some(443), None, None)
                .await,
            Err(StorageError::Conflict(_))
        ));

        // Different port: allowed
        repo.create_network_request(server_id, Some(tool_id), "api.example.com", Some(8443), None, None)
            .await
            .unwrap();
        // Admin-origin request for the same target: allowed (different origin)
        repo.create_network_request(server_id, None, "api.example.com", Some(443), None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn at_most_one_pending_admin_request_per_target() {
        let (repo, server_id, _) = setup().await;
        repo.create_module_request(server_id, None, "math", None, None)
            .await
            .unwrap();
        assert!(matches!(
            repo.create_module_request(server_id, None, "math", None, None).await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn decide_is_exactly_once() {
        let (repo, server_id, _) = setup().await;
        let request = repo
            .create_network_request(server_id, None, "api.example.com", None, None, None)
            .await
            .unwrap();

        let approved = repo
            .decide_network_request(request.id, RequestStatus::Approved, "admin")
            .await
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.decided_by.as_deref(), Some("admin"));
        assert!(approved.decided_at.is_some());

        assert!(matches!(
            repo.decide_network_request(request.id, RequestStatus::Rejected, "admin").await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn deciding_frees_the_target_for_a_new_request() {
        let (repo, server_id, _) = setup().await;
        let request = repo
            .create_network_request(server_id, None, "api.example.com", None, None, None)
            .await
            .unwrap();
        repo.decide_network_request(request.id, RequestStatus::Rejected, "admin")
            .await
            .unwrap();
        // A rejected request no longer blocks a fresh one
        repo.create_network_request(server_id, None, "api.example.com", None, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn approved_lists_feed_the_sandbox_policy() {
        let (repo, server_id, _) = setup().await;
        let n1 = repo
            .create_network_request(server_id, None, "b.example.com", None, None, None)
            .await
            .unwrap();
        let n2 = repo
            .create_network_request(server_id, None, "a.example.com", None, None, None)
            .await
            .unwrap();
        repo.decide_network_request(n1.id, RequestStatus::Approved, "admin")
            .await
            .unwrap();
        repo.decide_network_request(n2.id, RequestStatus::Approved, "admin")
            .await
            .unwrap();

        let m = repo
            .create_module_request(server_id, None, "math", None, None)
            .await
            .unwrap();
        repo.decide_module_request(m.id, RequestStatus::Approved, "admin")
            .await
            .unwrap();

        assert_eq!(
            repo.approved_hosts(server_id).await.unwrap(),
            vec!["a.example.com", "b.example.com"]
        );
        assert_eq!(repo.approved_modules(server_id).await.unwrap(), vec!["math"]);
    }

    #[tokio::test]
    async fn pending_status_cannot_be_a_decision() {
        let (repo, server_id, _) = setup().await;
        let request = repo
            .create_network_request(server_id, None, "x.example.com", None, None, None)
            .await
            .unwrap();
        assert!(matches!(
            repo.decide_network_request(request.id, RequestStatus::Pending, "admin").await,
            Err(StorageError::Conflict(_))
        ));
    }
}
