//! Server, server secret and external source repositories

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use mcpbox_core::{
    AuthType, ExternalMcpSource, NetworkMode, Server, ServerSecret, ServerStatus, SourceStatus,
    TransportType,
};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::repositories::{get_enum, get_string_vec, get_uuid};

/// Fields accepted when creating or updating a server.
#[derive(Debug, Clone, Default)]
pub struct ServerChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub network_mode: Option<NetworkMode>,
    pub allowed_hosts: Option<Vec<String>>,
    pub default_timeout_ms: Option<i64>,
    pub helper_code: Option<Option<String>>,
}

#[derive(Clone)]
pub struct ServerRepo {
    db: Database,
}

impl ServerRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn map(row: &SqliteRow) -> StorageResult<Server> {
        Ok(Server {
            id: get_uuid(row, "id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            status: get_enum::<ServerStatus>(row, "status")?,
            network_mode: get_enum::<NetworkMode>(row, "network_mode")?,
            allowed_hosts: get_string_vec(row, "allowed_hosts")?,
            default_timeout_ms: row.try_get("default_timeout_ms")?,
            helper_code: row.try_get("helper_code")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn create(&self, name: &str, description: Option<&str>) -> StorageResult<Server> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO servers (id, name, description, status, network_mode, allowed_hosts, created_at, updated_at)
             VALUES (?, ?, ?, 'stopped', 'isolated', '[]', ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "server name"))?;
        self.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> StorageResult<Server> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("server {id}")))?;
        Self::map(&row)
    }

    pub async fn get_by_name(&self, name: &str) -> StorageResult<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(Self::map).transpose()
    }

    pub async fn list(&self) -> StorageResult<Vec<Server>> {
        let rows = sqlx::query("SELECT * FROM servers ORDER BY created_at ASC")
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(Self::map).collect()
    }

    pub async fn update(&self, id: Uuid, changes: ServerChanges) -> StorageResult<Server> {
        let current = self.get(id).await?;
        let name = changes.name.unwrap_or(current.name);
        let description = changes.description.unwrap_or(current.description);
        let network_mode = changes.network_mode.unwrap_or(current.network_mode);
        let allowed_hosts = changes.allowed_hosts.unwrap_or(current.allowed_hosts);
        let default_timeout_ms = changes.default_timeout_ms.unwrap_or(current.default_timeout_ms);
        let helper_code = changes.helper_code.unwrap_or(current.helper_code);

        sqlx::query(
            "UPDATE servers SET name = ?, description = ?, network_mode = ?, allowed_hosts = ?,
             default_timeout_ms = ?, helper_code = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&description)
        .bind(network_mode.as_str())
        .bind(serde_json::to_string(&allowed_hosts).expect("strings serialise"))
        .bind(default_timeout_ms)
        .bind(&helper_code)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "server name"))?;
        self.get(id).await
    }

    pub async fn update_status(&self, id: Uuid, status: ServerStatus) -> StorageResult<()> {
        let result = sqlx::query("UPDATE servers SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("server {id}")));
        }
        Ok(())
    }

    /// Cascades to tools, versions, secrets, credentials, sources and their
    /// pending requests via foreign keys.
    pub async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // === Server secrets ===

    fn map_secret(row: &SqliteRow) -> StorageResult<ServerSecret> {
        Ok(ServerSecret {
            id: get_uuid(row, "id")?,
            server_id: get_uuid(row, "server_id")?,
            key_name: row.try_get("key_name")?,
            encrypted_value: row.try_get("encrypted_value")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Insert or replace the secret for `(server_id, key_name)`.
    pub async fn upsert_secret(
        &self,
        server_id: Uuid,
        key_name: &str,
        encrypted_value: &[u8],
        description: Option<&str>,
    ) -> StorageResult<ServerSecret> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO server_secrets (id, server_id, key_name, encrypted_value, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (server_id, key_name)
             DO UPDATE SET encrypted_value = excluded.encrypted_value,
                           description = excluded.description,
                           updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(server_id.to_string())
        .bind(key_name)
        .bind(encrypted_value)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        let row = sqlx::query("SELECT * FROM server_secrets WHERE server_id = ? AND key_name = ?")
            .bind(server_id.to_string())
            .bind(key_name)
            .fetch_one(self.db.pool())
            .await?;
        Self::map_secret(&row)
    }

    pub async fn list_secrets(&self, server_id: Uuid) -> StorageResult<Vec<ServerSecret>> {
        let rows = sqlx::query(
            "SELECT * FROM server_secrets WHERE server_id = ? ORDER BY key_name ASC",
        )
        .bind(server_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Self::map_secret).collect()
    }

    pub async fn delete_secret(&self, server_id: Uuid, key_name: &str) -> StorageResult<bool> {
        let result =
            sqlx::query("DELETE FROM server_secrets WHERE server_id = ? AND key_name = ?")
                .bind(server_id.to_string())
                .bind(key_name)
                .execute(self.db.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // === External MCP sources ===

    fn map_source(row: &SqliteRow) -> StorageResult<ExternalMcpSource> {
        Ok(ExternalMcpSource {
            id: get_uuid(row, "id")?,
            server_id: get_uuid(row, "server_id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            transport_type: get_enum::<TransportType>(row, "transport_type")?,
            auth_type: get_enum::<AuthType>(row, "auth_type")?,
            auth_secret_name: row.try_get("auth_secret_name")?,
            auth_header_name: row.try_get("auth_header_name")?,
            oauth_tokens_encrypted: row.try_get("oauth_tokens_encrypted")?,
            status: get_enum::<SourceStatus>(row, "status")?,
            last_discovered_at: row.try_get("last_discovered_at")?,
            tool_count: row.try_get("tool_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_source(
        &self,
        server_id: Uuid,
        name: &str,
        url: &str,
        transport_type: TransportType,
        auth_type: AuthType,
        auth_secret_name: Option<&str>,
        auth_header_name: Option<&str>,
    ) -> StorageResult<ExternalMcpSource> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO external_mcp_sources
             (id, server_id, name, url, transport_type, auth_type, auth_secret_name, auth_header_name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(name)
        .bind(url)
        .bind(transport_type.as_str())
        .bind(auth_type.as_str())
        .bind(auth_secret_name)
        .bind(auth_header_name)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;
        self.get_source(id).await
    }

    pub async fn get_source(&self, id: Uuid) -> StorageResult<ExternalMcpSource> {
        let row = sqlx::query("SELECT * FROM external_mcp_sources WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("external source {id}")))?;
        Self::map_source(&row)
    }

    pub async fn list_sources(&self, server_id: Uuid) -> StorageResult<Vec<ExternalMcpSource>> {
        let rows = sqlx::query(
            "SELECT * FROM external_mcp_sources WHERE server_id = ? ORDER BY created_at ASC",
        )
        .bind(server_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Self::map_source).collect()
    }

    pub async fn record_discovery(
        &self,
        id: Uuid,
        status: SourceStatus,
        tool_count: i64,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE external_mcp_sources SET status = ?, tool_count = ?, last_discovered_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(tool_count)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn update_source_tokens(
        &self,
        id: Uuid,
        oauth_tokens_encrypted: Option<&[u8]>,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE external_mcp_sources SET oauth_tokens_encrypted = ?, updated_at = ? WHERE id = ?",
        )
        .bind(oauth_tokens_encrypted)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Imported tools survive source deletion; the FK sets their
    /// `external_source_id` to NULL.
    pub async fn delete_source(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM external_mcp_sources WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test;

    #[tokio::test]
    async fn create_get_update_delete() {
        let repo = ServerRepo::new(connect_test().await);
        let server = repo.create("weather", Some("demo")).await.unwrap();
        assert_eq!(server.status, ServerStatus::Stopped);
        assert_eq!(server.network_mode, NetworkMode::Isolated);

        let updated = repo
            .update(
                server.id,
                ServerChanges {
                    network_mode: Some(NetworkMode::Allowlist),
                    allowed_hosts: Some(vec!["api.example.com".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.network_mode, NetworkMode::Allowlist);
        assert_eq!(updated.allowed_hosts, vec!["api.example.com"]);

        repo.update_status(server.id, ServerStatus::Running).await.unwrap();
        assert_eq!(repo.get(server.id).await.unwrap().status, ServerStatus::Running);

        assert!(repo.delete(server.id).await.unwrap());
        assert!(matches!(repo.get(server.id).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_server_name_conflicts() {
        let repo = ServerRepo::new(connect_test().await);
        repo.create("weather", None).await.unwrap();
        assert!(matches!(
            repo.create("weather", None).await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn secrets_are_unique_per_key_and_replaced_on_upsert() {
        let db = connect_test().await;
        let repo = ServerRepo::new(db);
        let server = repo.create("s", None).await.unwrap();

        repo.upsert_secret(server.id, "API_KEY", b"ct-1", None).await.unwrap();
        repo.upsert_secret(server.id, "API_KEY", b"ct-2", Some("rotated")).await.unwrap();

        let secrets = repo.list_secrets(server.id).await.unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].encrypted_value, b"ct-2");
        assert_eq!(secrets[0].description.as_deref(), Some("rotated"));

        assert!(repo.delete_secret(server.id, "API_KEY").await.unwrap());
        assert!(!repo.delete_secret(server.id, "API_KEY").await.unwrap());
    }

    #[tokio::test]
    async fn deleting_server_cascades_to_secrets_and_sources() {
        let db = connect_test().await;
        let repo = ServerRepo::new(db.clone());
        let server = repo.create("s", None).await.unwrap();
        repo.upsert_secret(server.id, "K", b"v", None).await.unwrap();
        repo.create_source(
            server.id,
            "ext",
            "http://mcp.example/mcp",
            TransportType::StreamableHttp,
            AuthType::None,
            None,
            None,
        )
        .await
        .unwrap();

        repo.delete(server.id).await.unwrap();

        let secrets: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM server_secrets")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(secrets.0, 0);
        let sources: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM external_mcp_sources")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(sources.0, 0);
    }
}
