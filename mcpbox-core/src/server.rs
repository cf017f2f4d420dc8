//! Server, server secret and external MCP source entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AuthType, NetworkMode, ServerStatus, SourceStatus, TransportType};

/// A logical namespace of tools with a shared network policy and secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ServerStatus,
    pub network_mode: NetworkMode,
    /// Hostnames tools may reach when `network_mode` is allowlist.
    /// Order is preserved; duplicates are not stored.
    pub allowed_hosts: Vec<String>,
    pub default_timeout_ms: i64,
    /// Shared tool-language code prepended to every tool of this server.
    pub helper_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Server {
    /// Hosts to hand to the sandbox, or `None` when the server is isolated.
    pub fn effective_allowed_hosts(&self) -> Option<&[String]> {
        match self.network_mode {
            NetworkMode::Allowlist => Some(&self.allowed_hosts),
            NetworkMode::Isolated => None,
        }
    }
}

/// An encrypted key→value pair scoped to a server, consumed by tool code
/// as a read-only environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSecret {
    pub id: Uuid,
    pub server_id: Uuid,
    pub key_name: String,
    /// AES-GCM ciphertext, AAD-bound to the key name.
    #[serde(skip_serializing)]
    pub encrypted_value: Vec<u8>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reference to an external MCP server whose tools can be imported as
/// passthrough tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalMcpSource {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub url: String,
    pub transport_type: TransportType,
    pub auth_type: AuthType,
    /// Name of the [`ServerSecret`] that holds the auth material.
    pub auth_secret_name: Option<String>,
    /// Header name when `auth_type` is `header`.
    pub auth_header_name: Option<String>,
    /// Encrypted OAuth token blob for sources that authenticate via OAuth.
    #[serde(skip_serializing)]
    pub oauth_tokens_encrypted: Option<Vec<u8>>,
    pub status: SourceStatus,
    pub last_discovered_at: Option<DateTime<Utc>>,
    pub tool_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(mode: NetworkMode) -> Server {
        Server {
            id: Uuid::new_v4(),
            name: "weather".to_string(),
            description: None,
            status: ServerStatus::Stopped,
            network_mode: mode,
            allowed_hosts: vec!["api.example.com".to_string()],
            default_timeout_ms: 30_000,
            helper_code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn isolated_server_has_no_effective_hosts() {
        assert!(server(NetworkMode::Isolated).effective_allowed_hosts().is_none());
    }

    #[test]
    fn allowlist_server_exposes_hosts() {
        let s = server(NetworkMode::Allowlist);
        assert_eq!(s.effective_allowed_hosts().unwrap(), ["api.example.com"]);
    }

    #[test]
    fn secret_ciphertext_is_not_serialised() {
        let secret = ServerSecret {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            key_name: "API_KEY".to_string(),
            encrypted_value: vec![1, 2, 3],
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&secret).unwrap();
        assert!(!json.contains("encrypted_value"));
    }
}
