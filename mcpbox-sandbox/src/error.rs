//! Sandbox error taxonomy
//!
//! Every failure an execution can produce maps to one [`ErrorKind`]; the
//! management plane logs the kind and surfaces only the public message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected by the static validator before parsing.
    StaticRejection,
    /// `import` of a module outside the allowlist.
    ImportDenied,
    /// Access to a forbidden attribute at runtime.
    AttributeDenied,
    /// The cooperative timeout or step budget expired.
    Timeout,
    /// Memory, recursion or output budget exhausted.
    ResourceExhaustion,
    /// An outbound request was blocked by SSRF policy.
    HttpSsrf,
    /// The tool raised an ordinary exception.
    ToolException,
    /// Output exceeded the cap and was cut.
    Truncation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StaticRejection => "static_rejection",
            ErrorKind::ImportDenied => "import_denied",
            ErrorKind::AttributeDenied => "attribute_denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceExhaustion => "resource_exhaustion",
            ErrorKind::HttpSsrf => "http_ssrf",
            ErrorKind::ToolException => "tool_exception",
            ErrorKind::Truncation => "truncation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by the sandbox runtime.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("static validation failed: forbidden pattern '{pattern}'")]
    StaticRejection { pattern: String },

    #[error("syntax error at line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("tool code must define an async main() function")]
    MissingMain,

    #[error("import of module '{module}' is not allowed")]
    ImportDenied { module: String },

    #[error("access to attribute '{attribute}' is not allowed")]
    AttributeDenied { attribute: String },

    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("resource limit exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("{0}")]
    Ssrf(String),

    #[error("{kind}: {message}")]
    ToolException { kind: String, message: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("server not registered: {0}")]
    ServerNotRegistered(String),

    #[error("resource limits not satisfied: {0}")]
    LimitsNotSatisfied(String),
}

impl SandboxError {
    /// The taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::StaticRejection { .. }
            | SandboxError::SyntaxError { .. }
            | SandboxError::MissingMain => ErrorKind::StaticRejection,
            SandboxError::ImportDenied { .. } => ErrorKind::ImportDenied,
            SandboxError::AttributeDenied { .. } => ErrorKind::AttributeDenied,
            SandboxError::Timeout { .. } => ErrorKind::Timeout,
            SandboxError::ResourceExhaustion(_) | SandboxError::LimitsNotSatisfied(_) => {
                ErrorKind::ResourceExhaustion
            }
            SandboxError::Ssrf(_) => ErrorKind::HttpSsrf,
            SandboxError::ToolException { .. }
            | SandboxError::ToolNotFound(_)
            | SandboxError::ServerNotRegistered(_) => ErrorKind::ToolException,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(
            SandboxError::StaticRejection { pattern: "__class__".into() }.kind(),
            ErrorKind::StaticRejection
        );
        assert_eq!(
            SandboxError::ImportDenied { module: "os".into() }.kind(),
            ErrorKind::ImportDenied
        );
        assert_eq!(
            SandboxError::Timeout { timeout_ms: 30000 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(SandboxError::Ssrf("blocked".into()).kind(), ErrorKind::HttpSsrf);
    }

    #[test]
    fn kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::HttpSsrf).unwrap();
        assert_eq!(json, "\"http_ssrf\"");
    }
}
