//! Tool registry: in-memory map of registered servers and their tools
//!
//! The management plane replaces a server's whole registration atomically
//! on every register call, so re-registration after approval changes is
//! idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// A registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's input.
    #[serde(default)]
    pub parameters: Value,
    /// Tool-language source; `None` for passthrough tools.
    pub source_code: Option<String>,
    /// Name of the tool on the external server, for passthrough tools.
    pub external_tool_name: Option<String>,
    /// External source the passthrough forwards to.
    pub external_source_id: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Connection details for an external MCP source of a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSourceConfig {
    pub source_id: String,
    pub url: String,
    #[serde(default)]
    pub auth_headers: HashMap<String, String>,
}

/// A registered server: tools plus the policy and secrets they run under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredServer {
    pub server_id: String,
    pub server_name: String,
    pub helper_code: Option<String>,
    /// Modules tool code may import; `None` means the built-in defaults.
    pub allowed_modules: Option<Vec<String>>,
    /// Hostnames tools may reach; `None` means network-isolated.
    pub allowed_hosts: Option<Vec<String>>,
    /// Decrypted secrets injected as the tool environment.
    pub secrets: HashMap<String, String>,
    pub tools: HashMap<String, RegisteredTool>,
    #[serde(default)]
    pub external_sources: Vec<ExternalSourceConfig>,
}

impl RegisteredServer {
    /// Gateway-facing name of one of this server's tools.
    pub fn full_tool_name(&self, tool: &str) -> String {
        format!("{}__{}", self.server_name, tool)
    }
}

/// In-memory registry of servers and their tools.
#[derive(Default)]
pub struct ToolRegistry {
    servers: RwLock<HashMap<String, Arc<RegisteredServer>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server, replacing any existing registration for the same
    /// id in one swap.
    pub fn register_server(&self, server: RegisteredServer) -> usize {
        let count = server.tools.len();
        let id = server.server_id.clone();
        let name = server.server_name.clone();
        self.servers.write().insert(id.clone(), Arc::new(server));
        info!(server = %name, id = %id, tools = count, "registered server");
        count
    }

    pub fn unregister_server(&self, server_id: &str) -> bool {
        let removed = self.servers.write().remove(server_id);
        if let Some(server) = &removed {
            info!(server = %server.server_name, id = %server_id, "unregistered server");
        }
        removed.is_some()
    }

    /// Replace only the secrets of a registered server.
    pub fn update_server_secrets(
        &self,
        server_id: &str,
        secrets: HashMap<String, String>,
    ) -> bool {
        let mut servers = self.servers.write();
        match servers.get(server_id) {
            Some(existing) => {
                let mut updated = (**existing).clone();
                updated.secrets = secrets;
                servers.insert(server_id.to_string(), Arc::new(updated));
                true
            }
            None => false,
        }
    }

    pub fn get_server(&self, server_id: &str) -> Option<Arc<RegisteredServer>> {
        self.servers.read().get(server_id).cloned()
    }

    /// Resolve a tool by its full `server__tool` name.
    pub fn resolve(&self, full_name: &str) -> Option<(Arc<RegisteredServer>, RegisteredTool)> {
        let servers = self.servers.read();
        for server in servers.values() {
            for (name, tool) in &server.tools {
                if server.full_tool_name(name) == full_name {
                    return Some((server.clone(), tool.clone()));
                }
            }
        }
        None
    }

    /// All registered tools in MCP `tools/list` form.
    pub fn list_tools(&self) -> Vec<Value> {
        let servers = self.servers.read();
        let mut out = Vec::new();
        for server in servers.values() {
            for (name, tool) in &server.tools {
                out.push(serde_json::json!({
                    "name": server.full_tool_name(name),
                    "description": tool.description,
                    "inputSchema": tool.parameters,
                }));
            }
        }
        out.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        out
    }

    /// Tools of a single server, in the same form.
    pub fn list_tools_for_server(&self, server_id: &str) -> Vec<Value> {
        let servers = self.servers.read();
        let Some(server) = servers.get(server_id) else {
            return Vec::new();
        };
        server
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": server.full_tool_name(name),
                    "description": tool.description,
                    "inputSchema": tool.parameters,
                })
            })
            .collect()
    }

    pub fn server_count(&self) -> usize {
        self.servers.read().len()
    }

    pub fn tool_count(&self) -> usize {
        self.servers.read().values().map(|s| s.tools.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> RegisteredTool {
        RegisteredTool {
            name: name.to_string(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            source_code: Some("async def main():\n    return 1".to_string()),
            external_tool_name: None,
            external_source_id: None,
            timeout_ms: 30_000,
        }
    }

    fn server(id: &str, name: &str, tools: &[&str]) -> RegisteredServer {
        RegisteredServer {
            server_id: id.to_string(),
            server_name: name.to_string(),
            helper_code: None,
            allowed_modules: None,
            allowed_hosts: None,
            secrets: HashMap::new(),
            tools: tools.iter().map(|t| (t.to_string(), tool(t))).collect(),
            external_sources: Vec::new(),
        }
    }

    #[test]
    fn register_resolve_unregister() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.register_server(server("s1", "weather", &["forecast"])), 1);

        let (owner, resolved) = registry.resolve("weather__forecast").unwrap();
        assert_eq!(owner.server_id, "s1");
        assert_eq!(resolved.name, "forecast");

        assert!(registry.unregister_server("s1"));
        assert!(registry.resolve("weather__forecast").is_none());
        assert!(!registry.unregister_server("s1"));
    }

    #[test]
    fn reregistration_replaces_tool_set() {
        let registry = ToolRegistry::new();
        registry.register_server(server("s1", "weather", &["forecast", "alerts"]));
        assert_eq!(registry.tool_count(), 2);

        registry.register_server(server("s1", "weather", &["forecast"]));
        assert_eq!(registry.tool_count(), 1);
        assert!(registry.resolve("weather__alerts").is_none());
    }

    #[test]
    fn list_tools_is_sorted_and_prefixed() {
        let registry = ToolRegistry::new();
        registry.register_server(server("s1", "beta", &["b"]));
        registry.register_server(server("s2", "alpha", &["a"]));

        let names: Vec<String> = registry
            .list_tools()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["alpha__a", "beta__b"]);
    }

    #[test]
    fn update_secrets_only_touches_secrets() {
        let registry = ToolRegistry::new();
        registry.register_server(server("s1", "weather", &["forecast"]));

        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "v2".to_string());
        assert!(registry.update_server_secrets("s1", secrets));

        let server = registry.get_server("s1").unwrap();
        assert_eq!(server.secrets.get("API_KEY").unwrap(), "v2");
        assert_eq!(server.tools.len(), 1);

        assert!(!registry.update_server_secrets("missing", HashMap::new()));
    }
}
