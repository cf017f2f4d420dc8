//! HTTP client error types

use mcpbox_resilience::{Retryable, RETRYABLE_STATUS_CODES};
use thiserror::Error;

/// Errors from the SSRF-protected HTTP layer.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The URL was blocked before any socket was opened.
    #[error("blocked by SSRF policy: {0}")]
    Ssrf(String),

    /// The target host is not on the server's allowlist.
    #[error("host '{0}' is not in the allowed hosts for this server")]
    HostNotAllowed(String),

    /// Outbound HTTP is disabled for this server.
    #[error("outbound network access is disabled for this server")]
    NetworkIsolated,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else if err.is_connect() {
            HttpError::Connection(err.to_string())
        } else {
            HttpError::Request(err.to_string())
        }
    }
}

impl Retryable for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            HttpError::Timeout | HttpError::Connection(_) => true,
            HttpError::Status { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(HttpError::Timeout.is_retryable());
        assert!(HttpError::Connection("reset".into()).is_retryable());
        assert!(HttpError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(HttpError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!HttpError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(!HttpError::Ssrf("blocked".into()).is_retryable());
        assert!(!HttpError::NetworkIsolated.is_retryable());
    }
}
