//! Network-access and module approval artefacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::RequestStatus;

/// Who opened an approval request.
///
/// LLM-initiated requests carry the originating tool; admin-initiated
/// requests carry only the server. Partial unique indexes in storage
/// guarantee at most one pending request per `(origin, target)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    Llm,
    Admin,
}

/// Request to let a server's tools reach a network host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAccessRequest {
    pub id: Uuid,
    pub server_id: Uuid,
    /// Set when the request was raised from a tool execution.
    pub tool_id: Option<Uuid>,
    pub host: String,
    pub port: Option<i64>,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub requested_by: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NetworkAccessRequest {
    pub fn origin(&self) -> RequestOrigin {
        if self.tool_id.is_some() {
            RequestOrigin::Llm
        } else {
            RequestOrigin::Admin
        }
    }

    /// Target identity used by the pending-uniqueness rule.
    pub fn target(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

/// Request to allow a runtime module for a server's tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRequest {
    pub id: Uuid,
    pub server_id: Uuid,
    pub tool_id: Option<Uuid>,
    pub module_name: String,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub requested_by: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ModuleRequest {
    pub fn origin(&self) -> RequestOrigin {
        if self.tool_id.is_some() {
            RequestOrigin::Llm
        } else {
            RequestOrigin::Admin
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_follows_tool_id() {
        let mut req = NetworkAccessRequest {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            tool_id: Some(Uuid::new_v4()),
            host: "api.example.com".to_string(),
            port: None,
            reason: None,
            status: RequestStatus::Pending,
            requested_by: None,
            decided_by: None,
            decided_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(req.origin(), RequestOrigin::Llm);
        req.tool_id = None;
        assert_eq!(req.origin(), RequestOrigin::Admin);
    }

    #[test]
    fn target_includes_port_when_present() {
        let req = NetworkAccessRequest {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            tool_id: None,
            host: "api.example.com".to_string(),
            port: Some(8443),
            reason: None,
            status: RequestStatus::Pending,
            requested_by: None,
            decided_by: None,
            decided_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(req.target(), "api.example.com:8443");
    }
}
