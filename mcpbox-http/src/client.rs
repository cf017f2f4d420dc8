//! SSRF-protected HTTP client
//!
//! Every request is validated by [`crate::ssrf`] first; the connection is
//! then made against the pinned IP via the resolver override, while the
//! original hostname stays in place for the Host header and TLS SNI.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::errors::HttpError;
use crate::ssrf::validate_url;

/// Outbound network policy applied before SSRF validation.
#[derive(Debug, Clone, Default)]
pub enum HostPolicy {
    /// No outbound HTTP at all.
    Isolated,
    /// Only the listed hostnames (exact, case-insensitive) may be reached.
    Allowlist(Vec<String>),
    /// Any host that passes SSRF validation.
    #[default]
    Open,
}

impl HostPolicy {
    fn check(&self, hostname: &str) -> Result<(), HttpError> {
        match self {
            HostPolicy::Open => Ok(()),
            HostPolicy::Isolated => Err(HttpError::NetworkIsolated),
            HostPolicy::Allowlist(hosts) => {
                if hosts.iter().any(|h| h.eq_ignore_ascii_case(hostname)) {
                    Ok(())
                } else {
                    Err(HttpError::HostNotAllowed(hostname.to_string()))
                }
            }
        }
    }
}

/// Response surfaced to callers (and, via the sandbox, to tool code).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub ok: bool,
    pub headers: HashMap<String, String>,
    pub body_text: String,
    /// Parsed body when the payload is JSON.
    pub body_json: Option<JsonValue>,
}

impl HttpResponse {
    /// Fetch-style JSON object view of the response.
    pub fn to_json(&self) -> JsonValue {
        json!({
            "ok": self.ok,
            "status": self.status,
            "headers": self.headers,
            "body": self.body_json.clone().unwrap_or(JsonValue::String(self.body_text.clone())),
        })
    }
}

/// HTTP client that enforces a host policy and SSRF validation on every
/// request.
#[derive(Debug, Clone)]
pub struct SsrfHttpClient {
    policy: HostPolicy,
    timeout: Duration,
    user_agent: String,
}

impl SsrfHttpClient {
    pub fn new(policy: HostPolicy, timeout: Duration) -> Self {
        Self {
            policy,
            timeout,
            user_agent: format!("mcpbox/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_open_policy(timeout: Duration) -> Self {
        Self::new(HostPolicy::Open, timeout)
    }

    /// Perform a request. `headers` are caller-supplied extras; `body` is
    /// sent as JSON unless it is a string, which is sent verbatim.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        body: Option<&JsonValue>,
    ) -> Result<HttpResponse, HttpError> {
        let method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| HttpError::Request(format!("invalid HTTP method: {method}")))?;

        // Policy check on the raw hostname, then full SSRF validation with
        // DNS pinning.
        let parsed = url::Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
        let hostname = parsed
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl("URL must have a hostname".to_string()))?;
        self.policy.check(hostname)?;

        let validated = validate_url(url).await?;
        debug!(url, pinned = ?validated.pinned_ip, "outbound request validated");

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            // Redirects could re-point the request at an unvalidated target
            .redirect(reqwest::redirect::Policy::none());

        // Pin the connection: the resolver override makes reqwest connect
        // to the validated address while the URL keeps the hostname, so the
        // Host header and SNI are unchanged.
        if let Some(addr) = validated.pinned_addr() {
            builder = builder.resolve(&validated.hostname, addr);
        }
        let client = builder.build()?;

        let mut request = client.request(method, url);

        if let Some(extra) = headers {
            let mut header_map = HeaderMap::new();
            for (key, value) in extra {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| HttpError::InvalidHeaderName(key.clone()))?;
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    header_map.insert(name, header_value);
                }
            }
            request = request.headers(header_map);
        }

        if let Some(body) = body {
            request = match body {
                JsonValue::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = request.send().await?;
        let status = response.status();

        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let body_text = response.text().await?;
        let body_json = serde_json::from_str::<JsonValue>(&body_text).ok();

        if status.is_server_error() || status.as_u16() == 429 {
            warn!(status = status.as_u16(), url, "upstream returned retryable status");
            return Err(HttpError::Status {
                status: status.as_u16(),
                body: body_text.chars().take(500).collect(),
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            ok: status.is_success(),
            headers: response_headers,
            body_text,
            body_json,
        })
    }

    pub async fn get(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<HttpResponse, HttpError> {
        self.request("GET", url, headers, None).await
    }

    pub async fn post(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        body: Option<&JsonValue>,
    ) -> Result<HttpResponse, HttpError> {
        self.request("POST", url, headers, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_policy_checks() {
        assert!(HostPolicy::Open.check("api.example.com").is_ok());
        assert!(matches!(
            HostPolicy::Isolated.check("api.example.com"),
            Err(HttpError::NetworkIsolated)
        ));

        let allow = HostPolicy::Allowlist(vec!["api.example.com".to_string()]);
        assert!(allow.check("API.EXAMPLE.COM").is_ok());
        assert!(matches!(
            allow.check("evil.example.com"),
            Err(HttpError::HostNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn isolated_client_rejects_before_validation() {
        let client = SsrfHttpClient::new(HostPolicy::Isolated, Duration::from_secs(5));
        let err = client.get("http://api.example.com/", None).await.unwrap_err();
        assert!(matches!(err, HttpError::NetworkIsolated));
    }

    #[tokio::test]
    async fn metadata_endpoint_never_reaches_the_socket() {
        let client = SsrfHttpClient::with_open_policy(Duration::from_secs(5));
        let err = client
            .get("http://169.254.169.254/latest/meta-data/", None)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Ssrf(_)));
    }

    #[tokio::test]
    async fn allowlist_blocks_other_hosts() {
        let client = SsrfHttpClient::new(
            HostPolicy::Allowlist(vec!["api.example.com".to_string()]),
            Duration::from_secs(5),
        );
        let err = client.get("http://other.example.com/", None).await.unwrap_err();
        assert!(matches!(err, HttpError::HostNotAllowed(_)));
    }
}
