//! Signed export/import of servers and tools
//!
//! The export document carries an HMAC-SHA256 signature over its
//! canonical JSON (minus `signature` and `exported_at`), keyed by the
//! encryption key. Credentials and secrets are never exported. Imports
//! verify the signature first, then load server by server; one broken
//! server aborts only itself.

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use mcpbox_core::ChangeSource;
use mcpbox_crypto::{sign_export, verify_export_signature, EncryptionKey};
use mcpbox_storage::{ServerRepo, ToolRepo};

use crate::error::{ApiError, ApiResult};
use crate::services::approval::{ApprovalEngine, ToolInput};

/// Export format version.
const EXPORT_VERSION: &str = "1.0";

pub struct ExportImportService {
    servers: ServerRepo,
    tools: ToolRepo,
    key: EncryptionKey,
}

/// Per-server import outcome.
#[derive(Debug, serde::Serialize)]
pub struct ImportReport {
    pub imported_servers: Vec<String>,
    pub skipped_servers: Vec<String>,
    pub imported_tools: usize,
}

impl ExportImportService {
    pub fn new(servers: ServerRepo, tools: ToolRepo, key: EncryptionKey) -> Self {
        Self { servers, tools, key }
    }

    /// Build the signed export document. Credentials are never included.
    pub async fn export(&self) -> ApiResult<JsonValue> {
        let servers = self.servers.list().await?;
        let mut exported = Vec::with_capacity(servers.len());
        for server in &servers {
            let tools = self.tools.list_by_server(server.id).await?;
            let tool_docs: Vec<JsonValue> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "tool_type": tool.tool_type,
                        "source_code": tool.source_code,
                        "timeout_ms": tool.timeout_ms,
                    })
                })
                .collect();
            exported.push(json!({
                "name": server.name,
                "description": server.description,
                "network_mode": server.network_mode,
                "allowed_hosts": server.allowed_hosts,
                "default_timeout_ms": server.default_timeout_ms,
                "helper_code": server.helper_code,
                "tools": tool_docs,
            }));
        }

        let mut document = json!({
            "version": EXPORT_VERSION,
            "exported_at": Utc::now().to_rfc3339(),
            "servers": exported,
        });
        let signature = sign_export(self.key.as_bytes(), &document);
        document["signature"] = json!(signature);
        Ok(document)
    }

    /// Import a signed document. Name collisions get an `-imported`
    /// suffix; a server whose tools fail to import is rolled back by
    /// deleting it again (savepoint semantics), leaving the rest intact.
    pub async fn import(&self, engine: &ApprovalEngine, document: &JsonValue) -> ApiResult<ImportReport> {
        if document.get("version").and_then(JsonValue::as_str) != Some(EXPORT_VERSION) {
            return Err(ApiError::Validation(format!(
                "unsupported export version; expected {EXPORT_VERSION}"
            )));
        }
        verify_export_signature(self.key.as_bytes(), document)
            .map_err(|_| ApiError::Validation("export signature is missing or invalid".into()))?;

        let servers = document
            .get("servers")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| ApiError::Validation("export document has no servers".into()))?;

        let mut report = ImportReport {
            imported_servers: Vec::new(),
            skipped_servers: Vec::new(),
            imported_tools: 0,
        };

        for server_doc in servers {
            let Some(name) = server_doc.get("name").and_then(JsonValue::as_str) else {
                warn!("skipping server entry without a name");
                continue;
            };
            match self.import_one_server(engine, name, server_doc).await {
                Ok(tool_count) => {
                    report.imported_servers.push(name.to_string());
                    report.imported_tools += tool_count;
                }
                Err(e) => {
                    warn!(server = name, error = %e, "server import failed; skipping");
                    report.skipped_servers.push(name.to_string());
                }
            }
        }
        info!(
            imported = report.imported_servers.len(),
            skipped = report.skipped_servers.len(),
            tools = report.imported_tools,
            "import complete"
        );
        Ok(report)
    }

    async fn import_one_server(
        &self,
        engine: &ApprovalEngine,
        name: &str,
        doc: &JsonValue,
    ) -> ApiResult<usize> {
        let final_name = if self.servers.get_by_name(name).await?.is_some() {
            format!("{name}-imported")
        } else {
            name.to_string()
        };

        let server = self
            .servers
            .create(&final_name, doc.get("description").and_then(JsonValue::as_str))
            .await?;

        let mut imported = 0usize;
        let tools = doc
            .get("tools")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        for tool_doc in &tools {
            let Some(tool_name) = tool_doc.get("name").and_then(JsonValue::as_str) else {
                continue;
            };
            let tool_type = tool_doc
                .get("tool_type")
                .and_then(JsonValue::as_str)
                .unwrap_or("python_code")
                .parse()
                .unwrap_or(mcpbox_core::ToolType::PythonCode);
            let input = ToolInput {
                name: tool_name.to_string(),
                description: tool_doc
                    .get("description")
                    .and_then(JsonValue::as_str)
                    .map(String::from),
                source_code: tool_doc
                    .get("source_code")
                    .and_then(JsonValue::as_str)
                    .map(String::from),
                timeout_ms: tool_doc.get("timeout_ms").and_then(JsonValue::as_i64),
                tool_type,
                external_source_id: None,
                external_tool_name: tool_doc
                    .get("external_tool_name")
                    .and_then(JsonValue::as_str)
                    .map(String::from),
            };
            match engine.create_tool(server.id, input, ChangeSource::Import).await {
                Ok(_) => imported += 1,
                Err(e) => {
                    // Savepoint semantics: one broken tool aborts only
                    // this server
                    self.servers.delete(server.id).await.ok();
                    return Err(e);
                }
            }
        }
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox_client::SandboxClient;
    use crate::services::secrets::SecretService;
    use mcpbox_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
    use mcpbox_storage::db::{connect_test, Database};
    use mcpbox_storage::{ApprovalRepo, SettingRepo};
    use std::sync::Arc;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes([2u8; 32])
    }

    fn engine_for(db: &Database) -> ApprovalEngine {
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        ApprovalEngine::new(
            ServerRepo::new(db.clone()),
            ToolRepo::new(db.clone()),
            ApprovalRepo::new(db.clone()),
            SettingRepo::new(db.clone()),
            SecretService::new(ServerRepo::new(db.clone()), key()),
            SandboxClient::new("http://127.0.0.1:1", "k".repeat(40), breakers),
        )
    }

    fn service_for(db: &Database) -> ExportImportService {
        ExportImportService::new(ServerRepo::new(db.clone()), ToolRepo::new(db.clone()), key())
    }

    async fn seed(db: &Database) {
        let engine = engine_for(db);
        let server = ServerRepo::new(db.clone())
            .create("weather", Some("demo"))
            .await
            .unwrap();
        engine
            .create_tool(
                server.id,
                ToolInput {
                    name: "forecast".to_string(),
                    description: Some("daily forecast".to_string()),
                    source_code: Some("async def main(city: str):\n    return city".to_string()),
                    timeout_ms: None,
                    tool_type: mcpbox_core::ToolType::PythonCode,
                    external_source_id: None,
                    external_tool_name: None,
                },
                ChangeSource::Manual,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn export_is_signed_and_credential_free() {
        let db = connect_test().await;
        seed(&db).await;
        let document = service_for(&db).export().await.unwrap();

        assert_eq!(document["version"], "1.0");
        assert!(document["signature"].is_string());
        verify_export_signature(key().as_bytes(), &document).unwrap();
        let rendered = document.to_string();
        assert!(!rendered.contains("credential"));
        assert!(!rendered.contains("secret"));
    }

    #[tokio::test]
    async fn round_trip_into_blank_database() {
        let source_db = connect_test().await;
        seed(&source_db).await;
        let document = service_for(&source_db).export().await.unwrap();

        let target_db = connect_test().await;
        let engine = engine_for(&target_db);
        let report = service_for(&target_db)
            .import(&engine, &document)
            .await
            .unwrap();
        assert_eq!(report.imported_servers, vec!["weather"]);
        assert_eq!(report.imported_tools, 1);

        let server = ServerRepo::new(target_db.clone())
            .get_by_name("weather")
            .await
            .unwrap()
            .expect("imported server exists");
        let tools = ToolRepo::new(target_db).list_by_server(server.id).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(
            tools[0].source_code.as_deref(),
            Some("async def main(city: str):\n    return city")
        );
    }

    #[tokio::test]
    async fn tampered_document_is_rejected() {
        let db = connect_test().await;
        seed(&db).await;
        let mut document = service_for(&db).export().await.unwrap();
        document["servers"][0]["name"] = json!("evil");

        let target_db = connect_test().await;
        let engine = engine_for(&target_db);
        let err = service_for(&target_db)
            .import(&engine, &document)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn unsigned_document_is_rejected() {
        let db = connect_test().await;
        let engine = engine_for(&db);
        let err = service_for(&db)
            .import(&engine, &json!({"version": "1.0", "servers": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn name_collisions_get_a_suffix() {
        let db = connect_test().await;
        seed(&db).await;
        let document = service_for(&db).export().await.unwrap();

        // Import into the same database: collision with "weather"
        let engine = engine_for(&db);
        let report = service_for(&db).import(&engine, &document).await.unwrap();
        assert_eq!(report.imported_servers, vec!["weather"]);
        assert!(ServerRepo::new(db)
            .get_by_name("weather-imported")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn broken_tool_aborts_only_its_server() {
        let db = connect_test().await;
        seed(&db).await;
        let mut document = service_for(&db).export().await.unwrap();

        // Append a second server whose tool fails static validation,
        // then re-sign
        document["servers"].as_array_mut().unwrap().push(json!({
            "name": "broken",
            "tools": [{"name": "bad", "tool_type": "python_code",
                       "source_code": "async def main():\n    return [].__class__"}],
        }));
        let mut unsigned = document.clone();
        unsigned.as_object_mut().unwrap().remove("signature");
        let signature = sign_export(key().as_bytes(), &unsigned);
        document["signature"] = json!(signature);

        let target_db = connect_test().await;
        let engine = engine_for(&target_db);
        let report = service_for(&target_db)
            .import(&engine, &document)
            .await
            .unwrap();
        assert_eq!(report.imported_servers, vec!["weather"]);
        assert_eq!(report.skipped_servers, vec!["broken"]);
        assert!(ServerRepo::new(target_db)
            .get_by_name("broken")
            .await
            .unwrap()
            .is_none());
    }
}
