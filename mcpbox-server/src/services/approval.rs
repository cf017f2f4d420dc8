//! Approval engine and tool lifecycle
//!
//! Every tool change, network host and runtime module is an artefact
//! requiring review. Code edits on an approved tool drop it back to
//! pending review (unless the global auto-approve policy is on), so the
//! TOCTOU gap where an approved tool's body is silently replaced stays
//! closed. Approval decisions trigger a full server re-registration
//! against the sandbox, which is idempotent (the whole tool/secret/host
//! set is replaced) and intentionally happens outside any transaction.

use std::collections::HashMap;

use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

use mcpbox_core::setting::{keys, APPROVAL_MODE_AUTO, APPROVAL_MODE_REQUIRE};
use mcpbox_core::{
    validate_tool_name, ApprovalStatus, ChangeSource, ModuleRequest, NetworkAccessRequest,
    RequestStatus, ServerStatus, Tool, ToolType,
};
use mcpbox_sandbox::pytool::validate::{extract_input_schema, validate_source};
use mcpbox_storage::repositories::tools::{NewTool, ToolChanges};
use mcpbox_storage::{ApprovalRepo, ServerRepo, SettingRepo, ToolRepo};

use crate::error::{ApiError, ApiResult};
use crate::sandbox_client::SandboxClient;
use crate::services::secrets::SecretService;

/// Security profile presets applied atomically to the settings table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProfile {
    Strict,
    Balanced,
    Permissive,
}

/// Plaintext input for creating a tool.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ToolInput {
    pub name: String,
    pub description: Option<String>,
    pub source_code: Option<String>,
    pub timeout_ms: Option<i64>,
    #[serde(default)]
    pub tool_type: ToolType,
    pub external_source_id: Option<Uuid>,
    pub external_tool_name: Option<String>,
}

/// Human-readable summary of a change set.
fn summarise_changes(fields: &[&str]) -> Option<String> {
    match fields {
        [] => None,
        [one] => Some(format!("Updated {one}")),
        [first, second] => Some(format!("Updated {first} and {second}")),
        [init @ .., last] => Some(format!("Updated {}, and {last}", init.join(", "))),
    }
}

pub struct ApprovalEngine {
    servers: ServerRepo,
    tools: ToolRepo,
    approvals: ApprovalRepo,
    settings: SettingRepo,
    secrets: SecretService,
    sandbox: SandboxClient,
}

impl ApprovalEngine {
    pub fn new(
        servers: ServerRepo,
        tools: ToolRepo,
        approvals: ApprovalRepo,
        settings: SettingRepo,
        secrets: SecretService,
        sandbox: SandboxClient,
    ) -> Self {
        Self {
            servers,
            tools,
            approvals,
            settings,
            secrets,
            sandbox,
        }
    }

    pub fn approvals(&self) -> &ApprovalRepo {
        &self.approvals
    }

    pub fn tools(&self) -> &ToolRepo {
        &self.tools
    }

    pub fn servers(&self) -> &ServerRepo {
        &self.servers
    }

    /// The stricter default applies wherever the setting is absent.
    async fn auto_approve_tools(&self) -> ApiResult<bool> {
        let mode = self
            .settings
            .get_value_or(keys::TOOL_APPROVAL_MODE, APPROVAL_MODE_REQUIRE)
            .await?;
        Ok(mode == APPROVAL_MODE_AUTO)
    }

    // === Tool lifecycle ===

    /// Create a tool: static validation, schema derivation, initial
    /// version row, approval state per policy.
    pub async fn create_tool(
        &self,
        server_id: Uuid,
        input: ToolInput,
        change_source: ChangeSource,
    ) -> ApiResult<Tool> {
        validate_tool_name(&input.name).map_err(|e| ApiError::Validation(e.to_string()))?;

        let input_schema = match (&input.tool_type, &input.source_code) {
            (ToolType::PythonCode, Some(code)) => {
                validate_source(code).map_err(|e| ApiError::Validation(e.to_string()))?;
                Some(extract_input_schema(code))
            }
            (ToolType::PythonCode, None) => {
                return Err(ApiError::Validation(
                    "tool code is required for python_code tools".into(),
                ))
            }
            (ToolType::McpPassthrough, _) => None,
        };

        let auto = self.auto_approve_tools().await?;
        let (approval_status, approved_by) = if auto {
            (ApprovalStatus::Approved, Some("auto_approve".to_string()))
        } else {
            (ApprovalStatus::PendingReview, None)
        };

        let tool = self
            .tools
            .create(
                server_id,
                NewTool {
                    name: input.name,
                    description: input.description,
                    tool_type: input.tool_type,
                    source_code: input.source_code,
                    input_schema,
                    timeout_ms: input.timeout_ms,
                    external_source_id: input.external_source_id,
                    external_tool_name: input.external_tool_name,
                    approval_status,
                    approved_by,
                },
                change_source,
            )
            .await?;
        Ok(tool)
    }

    /// Update a tool. A source change re-derives the schema and resets
    /// approval unless auto-approve is active.
    pub async fn update_tool(
        &self,
        tool_id: Uuid,
        source_code: Option<String>,
        description: Option<Option<String>>,
        enabled: Option<bool>,
        timeout_ms: Option<Option<i64>>,
        change_summary: Option<&str>,
    ) -> ApiResult<Tool> {
        let current = self.tools.get(tool_id).await?;

        let mut changed_fields = Vec::new();
        if description.is_some() {
            changed_fields.push("description");
        }
        if enabled.is_some() {
            changed_fields.push("enabled status");
        }
        if timeout_ms.is_some() {
            changed_fields.push("timeout");
        }

        let mut changes = ToolChanges {
            description,
            enabled,
            timeout_ms,
            ..Default::default()
        };

        let code_changed = match &source_code {
            Some(code) => current.source_code.as_deref() != Some(code.as_str()),
            None => false,
        };
        if let Some(code) = source_code {
            if code_changed {
                changed_fields.push("tool code");
            }
            validate_source(&code).map_err(|e| ApiError::Validation(e.to_string()))?;
            changes.input_schema = Some(extract_input_schema(&code));
            changes.source_code = Some(code);
        }

        if code_changed {
            if self.auto_approve_tools().await? {
                changes.approval_status = Some(ApprovalStatus::Approved);
                changes.approved_at = Some(Some(chrono::Utc::now()));
                changes.approved_by = Some(Some("auto_approve".to_string()));
            } else {
                // Code changed on a reviewed tool: back to review
                changes.approval_status = Some(ApprovalStatus::PendingReview);
                changes.approved_at = Some(None);
                changes.approved_by = Some(None);
            }
        }

        let generated_summary = summarise_changes(&changed_fields);
        let summary = change_summary.or(generated_summary.as_deref());
        let tool = self
            .tools
            .update(tool_id, changes, summary, ChangeSource::Manual)
            .await?;

        // A server that is live must stop serving the stale body
        if code_changed {
            self.reregister_if_running(tool.server_id).await;
        }
        Ok(tool)
    }

    /// Roll a tool back to a prior version: a new version row with
    /// `change_source = rollback`, approval reset exactly as an edit.
    pub async fn rollback_tool(&self, tool_id: Uuid, version_number: i64) -> ApiResult<Tool> {
        let target = self
            .tools
            .get_version(tool_id, version_number)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("version {version_number} of tool {tool_id}"))
            })?;

        let mut changes = ToolChanges {
            name: Some(target.name.clone()),
            description: Some(target.description.clone()),
            enabled: Some(target.enabled),
            timeout_ms: Some(target.timeout_ms),
            source_code: target.source_code.clone(),
            input_schema: target.input_schema.clone(),
            ..Default::default()
        };
        if self.auto_approve_tools().await? {
            changes.approval_status = Some(ApprovalStatus::Approved);
            changes.approved_at = Some(Some(chrono::Utc::now()));
            changes.approved_by = Some(Some("auto_approve".to_string()));
        } else {
            // Rolled-back code needs review like any other change
            changes.approval_status = Some(ApprovalStatus::PendingReview);
            changes.approved_at = Some(None);
            changes.approved_by = Some(None);
        }

        let tool = self
            .tools
            .update(
                tool_id,
                changes,
                Some(&format!("Rolled back to version {version_number}")),
                ChangeSource::Rollback,
            )
            .await?;
        self.reregister_if_running(tool.server_id).await;
        Ok(tool)
    }

    /// Approve a tool and re-register its server with the sandbox.
    pub async fn approve_tool(&self, tool_id: Uuid, actor: &str) -> ApiResult<Tool> {
        let tool = self
            .tools
            .set_approval(tool_id, ApprovalStatus::Approved, Some(actor), None)
            .await?;
        info!(tool = %tool.name, actor, "tool approved");
        self.reregister_if_running(tool.server_id).await;
        Ok(tool)
    }

    pub async fn reject_tool(&self, tool_id: Uuid, actor: &str, reason: Option<&str>) -> ApiResult<Tool> {
        let tool = self
            .tools
            .set_approval(tool_id, ApprovalStatus::Rejected, Some(actor), reason)
            .await?;
        info!(tool = %tool.name, actor, "tool rejected");
        self.reregister_if_running(tool.server_id).await;
        Ok(tool)
    }

    // === Network and module requests ===

    pub async fn request_network_access(
        &self,
        server_id: Uuid,
        tool_id: Option<Uuid>,
        host: &str,
        port: Option<i64>,
        reason: Option<&str>,
        requested_by: Option<&str>,
    ) -> ApiResult<NetworkAccessRequest> {
        if host.trim().is_empty() {
            return Err(ApiError::Validation("host must not be empty".into()));
        }
        Ok(self
            .approvals
            .create_network_request(server_id, tool_id, host, port, reason, requested_by)
            .await?)
    }

    pub async fn decide_network_request(
        &self,
        request_id: Uuid,
        approve: bool,
        actor: &str,
    ) -> ApiResult<NetworkAccessRequest> {
        let status = if approve {
            RequestStatus::Approved
        } else {
            RequestStatus::Rejected
        };
        let request = self
            .approvals
            .decide_network_request(request_id, status, actor)
            .await?;
        info!(host = %request.host, %status, actor, "network access request decided");
        if approve {
            self.reregister_if_running(request.server_id).await;
        }
        Ok(request)
    }

    pub async fn request_module(
        &self,
        server_id: Uuid,
        tool_id: Option<Uuid>,
        module_name: &str,
        reason: Option<&str>,
        requested_by: Option<&str>,
    ) -> ApiResult<ModuleRequest> {
        if module_name.trim().is_empty() {
            return Err(ApiError::Validation("module name must not be empty".into()));
        }
        Ok(self
            .approvals
            .create_module_request(server_id, tool_id, module_name, reason, requested_by)
            .await?)
    }

    pub async fn decide_module_request(
        &self,
        request_id: Uuid,
        approve: bool,
        actor: &str,
    ) -> ApiResult<ModuleRequest> {
        let status = if approve {
            RequestStatus::Approved
        } else {
            RequestStatus::Rejected
        };
        let request = self
            .approvals
            .decide_module_request(request_id, status, actor)
            .await?;
        info!(module = %request.module_name, %status, actor, "module request decided");
        if approve {
            self.reregister_if_running(request.server_id).await;
        }
        Ok(request)
    }

    // === Security profiles ===

    /// Apply a profile: the five policy settings written together.
    pub async fn apply_security_profile(&self, profile: SecurityProfile) -> ApiResult<()> {
        let (tool_mode, module_mode, network_mode, remote_editing) = match profile {
            SecurityProfile::Strict => (
                APPROVAL_MODE_REQUIRE,
                APPROVAL_MODE_REQUIRE,
                APPROVAL_MODE_REQUIRE,
                "false",
            ),
            SecurityProfile::Balanced => (
                APPROVAL_MODE_AUTO,
                APPROVAL_MODE_AUTO,
                APPROVAL_MODE_REQUIRE,
                "false",
            ),
            SecurityProfile::Permissive => (
                APPROVAL_MODE_AUTO,
                APPROVAL_MODE_AUTO,
                APPROVAL_MODE_AUTO,
                "true",
            ),
        };
        self.settings
            .set(keys::TOOL_APPROVAL_MODE, Some(tool_mode), false)
            .await?;
        self.settings
            .set(keys::MODULE_APPROVAL_MODE, Some(module_mode), false)
            .await?;
        self.settings
            .set(keys::NETWORK_ACCESS_POLICY, Some(network_mode), false)
            .await?;
        self.settings
            .set(keys::REMOTE_TOOL_EDITING, Some(remote_editing), false)
            .await?;
        // Redaction stays on in every profile
        self.settings
            .set(keys::REDACT_SECRETS_IN_OUTPUT, Some("true"), false)
            .await?;
        info!(?profile, "applied security profile");
        Ok(())
    }

    // === Sandbox registration ===

    /// Build the full registration payload for a server: tools, secrets,
    /// allowed modules and hosts, external source configs.
    pub async fn build_registration(&self, server_id: Uuid) -> ApiResult<JsonValue> {
        let server = self.servers.get(server_id).await?;
        let tools = self.tools.list_by_server(server_id).await?;
        let secrets = self.secrets.decrypted_for_injection(server_id).await?;

        // The request table is the source of truth for allowlists; hosts
        // configured directly on the server are merged in.
        let mut allowed_hosts = self.approvals.approved_hosts(server_id).await?;
        for host in &server.allowed_hosts {
            if !allowed_hosts.contains(host) {
                allowed_hosts.push(host.clone());
            }
        }
        let allowed_hosts = match server.network_mode {
            mcpbox_core::NetworkMode::Allowlist => Some(allowed_hosts),
            mcpbox_core::NetworkMode::Isolated => None,
        };

        let approved_modules = self.approvals.approved_modules(server_id).await?;
        let allowed_modules = if approved_modules.is_empty() {
            None
        } else {
            Some(approved_modules)
        };

        let mut tool_map = serde_json::Map::new();
        for tool in &tools {
            if !tool.enabled {
                continue;
            }
            tool_map.insert(
                tool.name.clone(),
                json!({
                    "name": tool.name,
                    "description": tool.description.clone().unwrap_or_default(),
                    "parameters": tool.input_schema.clone().unwrap_or(json!({"type": "object", "properties": {}})),
                    "source_code": tool.source_code,
                    "external_tool_name": tool.external_tool_name,
                    "external_source_id": tool.external_source_id.map(|id| id.to_string()),
                    "timeout_ms": tool.timeout_ms.unwrap_or(server.default_timeout_ms),
                }),
            );
        }

        let mut external_sources = Vec::new();
        for source in self.servers.list_sources(server_id).await? {
            if source.status == mcpbox_core::SourceStatus::Disabled {
                continue;
            }
            let auth_headers = self.build_source_auth_headers(&source, &secrets);
            external_sources.push(json!({
                "source_id": source.id.to_string(),
                "url": source.url,
                "auth_headers": auth_headers,
            }));
        }

        Ok(json!({
            "server_id": server.id.to_string(),
            "server_name": server.name,
            "helper_code": server.helper_code,
            "allowed_modules": allowed_modules,
            "allowed_hosts": allowed_hosts,
            "secrets": secrets,
            "tools": tool_map,
            "external_sources": external_sources,
        }))
    }

    fn build_source_auth_headers(
        &self,
        source: &mcpbox_core::ExternalMcpSource,
        secrets: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        let secret_value = source
            .auth_secret_name
            .as_ref()
            .and_then(|name| secrets.get(name));
        match (source.auth_type, secret_value) {
            (mcpbox_core::AuthType::Bearer, Some(value)) => {
                headers.insert("Authorization".to_string(), format!("Bearer {value}"));
            }
            (mcpbox_core::AuthType::Header, Some(value)) => {
                let name = source
                    .auth_header_name
                    .clone()
                    .unwrap_or_else(|| "X-API-Key".to_string());
                headers.insert(name, value.clone());
            }
            (mcpbox_core::AuthType::None, _) | (_, None) => {}
            (other, Some(_)) => {
                warn!(auth_type = %other, source = %source.name, "unsupported source auth type");
            }
        }
        headers
    }

    /// Discover tools on an external MCP source and import them as
    /// passthrough tools. Imported tools require approval like authored
    /// ones; already-imported names are left alone.
    pub async fn discover_external_source(&self, source_id: Uuid) -> ApiResult<(usize, usize)> {
        let source = self.servers.get_source(source_id).await?;
        let secrets = self.secrets.decrypted_for_injection(source.server_id).await?;
        let auth_headers = self.build_source_auth_headers(&source, &secrets);

        let discovery = self
            .sandbox
            .discover_external_tools(&source.url, &auth_headers)
            .await
            .map_err(|e| ApiError::internal(format!("discovery failed: {e}")))?;
        if discovery["success"] != json!(true) {
            let message = discovery["error"].as_str().unwrap_or("discovery failed");
            self.servers
                .record_discovery(source_id, mcpbox_core::SourceStatus::Error, source.tool_count)
                .await?;
            return Err(ApiError::Validation(format!(
                "external server discovery failed: {message}"
            )));
        }

        let discovered = discovery["tools"].as_array().cloned().unwrap_or_default();
        let existing = self.tools.list_by_server(source.server_id).await?;
        let mut imported = 0usize;
        for tool in &discovered {
            let Some(external_name) = tool.get("name").and_then(JsonValue::as_str) else {
                continue;
            };
            // Local names obey the tool-name grammar
            let local_name: String = external_name
                .to_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            let local_name = if local_name.chars().next().map(|c| c.is_ascii_lowercase()) == Some(true) {
                local_name
            } else {
                format!("t_{local_name}")
            };
            if existing.iter().any(|t| t.name == local_name) {
                continue;
            }
            let input = ToolInput {
                name: local_name,
                description: tool
                    .get("description")
                    .and_then(JsonValue::as_str)
                    .map(String::from),
                source_code: None,
                timeout_ms: None,
                tool_type: ToolType::McpPassthrough,
                external_source_id: Some(source_id),
                external_tool_name: Some(external_name.to_string()),
            };
            match self
                .create_tool(source.server_id, input, ChangeSource::Import)
                .await
            {
                Ok(_) => imported += 1,
                Err(e) => warn!(tool = external_name, error = %e, "skipping unimportable tool"),
            }
        }

        self.servers
            .record_discovery(
                source_id,
                mcpbox_core::SourceStatus::Connected,
                discovered.len() as i64,
            )
            .await?;
        info!(
            source = %source.name,
            discovered = discovered.len(),
            imported,
            "external source discovery complete"
        );
        Ok((discovered.len(), imported))
    }

    /// Start a server: register its full tool set with the sandbox.
    pub async fn start_server(&self, server_id: Uuid) -> ApiResult<usize> {
        let tools = self.tools.list_by_server(server_id).await?;
        if tools.is_empty() {
            return Err(ApiError::Validation(
                "server has no tools defined; add tools first".into(),
            ));
        }
        let payload = self.build_registration(server_id).await?;
        match self.sandbox.register_server(&payload).await {
            Ok(response) if response["success"] == json!(true) => {
                self.servers
                    .update_status(server_id, ServerStatus::Running)
                    .await?;
                Ok(response["tools_registered"].as_u64().unwrap_or(0) as usize)
            }
            Ok(response) => {
                self.servers.update_status(server_id, ServerStatus::Error).await?;
                Err(ApiError::internal(format!(
                    "sandbox rejected registration: {response}"
                )))
            }
            Err(e) => {
                self.servers.update_status(server_id, ServerStatus::Error).await?;
                Err(ApiError::internal(format!("sandbox unreachable: {e}")))
            }
        }
    }

    /// Stop a server. Succeeds even when the sandbox holds no
    /// registration.
    pub async fn stop_server(&self, server_id: Uuid) -> ApiResult<()> {
        if let Err(e) = self.sandbox.unregister_server(&server_id.to_string()).await {
            warn!(server = %server_id, error = %e, "unregister failed; marking stopped anyway");
        }
        self.servers
            .update_status(server_id, ServerStatus::Stopped)
            .await?;
        Ok(())
    }

    /// Re-register a running server after an approval change.
    /// At-least-once and idempotent: the sandbox replaces the whole set.
    async fn reregister_if_running(&self, server_id: Uuid) {
        let running = match self.servers.get(server_id).await {
            Ok(server) => server.status == ServerStatus::Running,
            Err(_) => false,
        };
        if !running {
            return;
        }
        match self.build_registration(server_id).await {
            Ok(payload) => {
                if let Err(e) = self.sandbox.register_server(&payload).await {
                    warn!(server = %server_id, error = %e, "re-registration after approval change failed");
                }
            }
            Err(e) => {
                warn!(server = %server_id, error = %e, "could not build registration payload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbox_crypto::EncryptionKey;
    use mcpbox_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
    use mcpbox_storage::db::connect_test;
    use std::sync::Arc;

    async fn engine() -> (ApprovalEngine, Uuid) {
        let db = connect_test().await;
        let servers = ServerRepo::new(db.clone());
        let server = servers.create("weather", None).await.unwrap();
        let secrets = SecretService::new(
            ServerRepo::new(db.clone()),
            EncryptionKey::from_bytes([1u8; 32]),
        );
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let sandbox = SandboxClient::new("http://127.0.0.1:1", "k".repeat(40), breakers);
        let engine = ApprovalEngine::new(
            servers,
            ToolRepo::new(db.clone()),
            ApprovalRepo::new(db.clone()),
            SettingRepo::new(db),
            secrets,
            sandbox,
        );
        (engine, server.id)
    }

    fn tool_input(name: &str, code: &str) -> ToolInput {
        ToolInput {
            name: name.to_string(),
            description: None,
            source_code: Some(code.to_string()),
            timeout_ms: None,
            tool_type: ToolType::PythonCode,
            external_source_id: None,
            external_tool_name: None,
        }
    }

    #[tokio::test]
    async fn create_requires_review_by_default() {
        let (engine, server_id) = engine().await;
        let tool = engine
            .create_tool(
                server_id,
                tool_input("t", "async def main(x: int) -> int:\n    return x * 2"),
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        assert_eq!(tool.approval_status, ApprovalStatus::PendingReview);
        assert_eq!(tool.input_schema.as_ref().unwrap()["properties"]["x"]["type"], "integer");
    }

    #[tokio::test]
    async fn escape_code_is_rejected_with_the_pattern_named() {
        let (engine, server_id) = engine().await;
        let err = engine
            .create_tool(
                server_id,
                tool_input("t", "async def main():\n    return [].__class__.__mro__"),
                ChangeSource::Manual,
            )
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(message) => assert!(message.contains("__class__"), "{message}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn code_edit_resets_approval() {
        let (engine, server_id) = engine().await;
        let tool = engine
            .create_tool(
                server_id,
                tool_input("t", "async def main():\n    return 1"),
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        engine.approve_tool(tool.id, "admin").await.unwrap();

        let updated = engine
            .update_tool(
                tool.id,
                Some("async def main():\n    return 2".to_string()),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(updated.approval_status, ApprovalStatus::PendingReview);
        assert!(updated.approved_at.is_none());
        assert_eq!(updated.current_version, 2);
    }

    #[tokio::test]
    async fn unchanged_code_keeps_approval() {
        let (engine, server_id) = engine().await;
        let code = "async def main():\n    return 1";
        let tool = engine
            .create_tool(server_id, tool_input("t", code), ChangeSource::Manual)
            .await
            .unwrap();
        engine.approve_tool(tool.id, "admin").await.unwrap();

        let updated = engine
            .update_tool(tool.id, Some(code.to_string()), None, Some(true), None, None)
            .await
            .unwrap();
        assert_eq!(updated.approval_status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn auto_approve_mode_skips_review() {
        let (engine, server_id) = engine().await;
        engine
            .apply_security_profile(SecurityProfile::Balanced)
            .await
            .unwrap();

        let tool = engine
            .create_tool(
                server_id,
                tool_input("t", "async def main():\n    return 1"),
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        assert_eq!(tool.approval_status, ApprovalStatus::Approved);
        assert_eq!(tool.approved_by.as_deref(), Some("auto_approve"));
    }

    #[tokio::test]
    async fn rollback_mints_a_version_and_resets_approval() {
        let (engine, server_id) = engine().await;
        let tool = engine
            .create_tool(
                server_id,
                tool_input("t", "async def main():\n    return 1"),
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        engine
            .update_tool(
                tool.id,
                Some("async def main():\n    return 2".to_string()),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();
        engine.approve_tool(tool.id, "admin").await.unwrap();

        let rolled = engine.rollback_tool(tool.id, 1).await.unwrap();
        assert_eq!(rolled.current_version, 3);
        assert_eq!(rolled.approval_status, ApprovalStatus::PendingReview);
        assert_eq!(
            rolled.source_code.as_deref(),
            Some("async def main():\n    return 1")
        );

        let versions = engine.tools().list_versions(tool.id).await.unwrap();
        assert_eq!(versions[0].change_source, ChangeSource::Rollback);
    }

    #[tokio::test]
    async fn registration_payload_reflects_policy() {
        let (engine, server_id) = engine().await;
        engine
            .create_tool(
                server_id,
                tool_input("t", "async def main():\n    return 1"),
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        engine
            .secrets
            .set(server_id, "API_KEY", "v", None)
            .await
            .unwrap();

        // Approve one module and one host; switch the server to allowlist
        let request = engine
            .request_module(server_id, None, "math", None, Some("admin"))
            .await
            .unwrap();
        engine
            .decide_module_request(request.id, true, "admin")
            .await
            .unwrap();
        let request = engine
            .request_network_access(server_id, None, "api.example.com", None, None, Some("admin"))
            .await
            .unwrap();
        engine
            .decide_network_request(request.id, true, "admin")
            .await
            .unwrap();
        engine
            .servers()
            .update(
                server_id,
                mcpbox_storage::repositories::servers::ServerChanges {
                    network_mode: Some(mcpbox_core::NetworkMode::Allowlist),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let payload = engine.build_registration(server_id).await.unwrap();
        assert_eq!(payload["server_name"], "weather");
        assert_eq!(payload["allowed_modules"], json!(["math"]));
        assert_eq!(payload["allowed_hosts"], json!(["api.example.com"]));
        assert_eq!(payload["secrets"]["API_KEY"], "v");
        assert!(payload["tools"]["t"]["source_code"].is_string());
    }

    #[tokio::test]
    async fn start_requires_tools_and_marks_error_on_sandbox_failure() {
        let (engine, server_id) = engine().await;
        let err = engine.start_server(server_id).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        engine
            .create_tool(
                server_id,
                tool_input("t", "async def main():\n    return 1"),
                ChangeSource::Manual,
            )
            .await
            .unwrap();
        // Sandbox at an unroutable port: start fails, status becomes error
        let err = engine.start_server(server_id).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal { .. }));
        let server = engine.servers().get(server_id).await.unwrap();
        assert_eq!(server.status, ServerStatus::Error);

        // Stop succeeds regardless of sandbox state
        engine.stop_server(server_id).await.unwrap();
        let server = engine.servers().get(server_id).await.unwrap();
        assert_eq!(server.status, ServerStatus::Stopped);
    }
}
