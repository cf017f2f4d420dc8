//! State enums shared across the MCPbox domain

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle status of a logical server (a namespace of tools).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Imported,
    Running,
    Stopped,
    Error,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Imported => "imported",
            ServerStatus::Running => "running",
            ServerStatus::Stopped => "stopped",
            ServerStatus::Error => "error",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imported" => Ok(ServerStatus::Imported),
            "running" => Ok(ServerStatus::Running),
            "stopped" => Ok(ServerStatus::Stopped),
            "error" => Ok(ServerStatus::Error),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "server status",
                value: s.to_string(),
            }),
        }
    }
}

/// Outbound network policy for a server's tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// No outbound HTTP at all.
    #[default]
    Isolated,
    /// Outbound HTTP restricted to the server's `allowed_hosts`.
    Allowlist,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Isolated => "isolated",
            NetworkMode::Allowlist => "allowlist",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(NetworkMode::Isolated),
            "allowlist" => Ok(NetworkMode::Allowlist),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "network mode",
                value: s.to_string(),
            }),
        }
    }
}

/// How a tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Tool code executed by the sandbox interpreter.
    #[default]
    PythonCode,
    /// Invocation forwarded verbatim to an external MCP server.
    McpPassthrough,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::PythonCode => "python_code",
            ToolType::McpPassthrough => "mcp_passthrough",
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python_code" => Ok(ToolType::PythonCode),
            "mcp_passthrough" => Ok(ToolType::McpPassthrough),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "tool type",
                value: s.to_string(),
            }),
        }
    }
}

/// Review state of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Draft,
    PendingReview,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "draft",
            ApprovalStatus::PendingReview => "pending_review",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    /// Whether a tool in this state may be executed through the gateway.
    pub fn is_executable(&self) -> bool {
        matches!(self, ApprovalStatus::Approved)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ApprovalStatus::Draft),
            "pending_review" => Ok(ApprovalStatus::PendingReview),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "approval status",
                value: s.to_string(),
            }),
        }
    }
}

/// Where a tool version change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    #[default]
    Manual,
    Import,
    Rollback,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::Manual => "manual",
            ChangeSource::Import => "import",
            ChangeSource::Rollback => "rollback",
        }
    }
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ChangeSource::Manual),
            "import" => Ok(ChangeSource::Import),
            "rollback" => Ok(ChangeSource::Rollback),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "change source",
                value: s.to_string(),
            }),
        }
    }
}

/// Authentication mechanism carried by a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    ApiKeyHeader,
    ApiKeyQuery,
    Bearer,
    Basic,
    Oauth2,
    CustomHeader,
    /// Plain named header, used by external MCP sources.
    Header,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::ApiKeyHeader => "api_key_header",
            AuthType::ApiKeyQuery => "api_key_query",
            AuthType::Bearer => "bearer",
            AuthType::Basic => "basic",
            AuthType::Oauth2 => "oauth2",
            AuthType::CustomHeader => "custom_header",
            AuthType::Header => "header",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AuthType::None),
            "api_key_header" => Ok(AuthType::ApiKeyHeader),
            "api_key_query" => Ok(AuthType::ApiKeyQuery),
            "bearer" => Ok(AuthType::Bearer),
            "basic" => Ok(AuthType::Basic),
            "oauth2" => Ok(AuthType::Oauth2),
            "custom_header" => Ok(AuthType::CustomHeader),
            "header" => Ok(AuthType::Header),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "auth type",
                value: s.to_string(),
            }),
        }
    }
}

/// OAuth 2.1 grant type for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    #[default]
    ClientCredentials,
    AuthorizationCode,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "grant type",
                value: s.to_string(),
            }),
        }
    }
}

/// State of an approval artefact (network-access or module request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "request status",
                value: s.to_string(),
            }),
        }
    }
}

/// Transport used to reach an external MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    #[default]
    StreamableHttp,
    Sse,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::StreamableHttp => "streamable_http",
            TransportType::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streamable_http" => Ok(TransportType::StreamableHttp),
            "sse" => Ok(TransportType::Sse),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "transport type",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of an external MCP source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Configured,
    Connected,
    Error,
    Disabled,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Configured => "configured",
            SourceStatus::Connected => "connected",
            SourceStatus::Error => "error",
            SourceStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "configured" => Ok(SourceStatus::Configured),
            "connected" => Ok(SourceStatus::Connected),
            "error" => Ok(SourceStatus::Error),
            "disabled" => Ok(SourceStatus::Disabled),
            _ => Err(CoreError::InvalidEnumValue {
                kind: "source status",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_status_round_trip() {
        for status in [
            ServerStatus::Imported,
            ServerStatus::Running,
            ServerStatus::Stopped,
            ServerStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ServerStatus>().unwrap(), status);
        }
    }

    #[test]
    fn approval_status_executable() {
        assert!(ApprovalStatus::Approved.is_executable());
        assert!(!ApprovalStatus::PendingReview.is_executable());
        assert!(!ApprovalStatus::Draft.is_executable());
        assert!(!ApprovalStatus::Rejected.is_executable());
    }

    #[test]
    fn unknown_value_is_rejected() {
        assert!("bogus".parse::<ApprovalStatus>().is_err());
        assert!("bogus".parse::<NetworkMode>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ApprovalStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
        let json = serde_json::to_string(&ToolType::McpPassthrough).unwrap();
        assert_eq!(json, "\"mcp_passthrough\"");
    }
}
