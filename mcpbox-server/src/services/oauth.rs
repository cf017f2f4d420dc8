//! OAuth 2.1 client: discovery, PKCE authorization-code flow, refresh
//!
//! Pending authorization flows live in an in-memory map keyed by the
//! `state` nonce with a 10-minute TTL; the nonce is also persisted on the
//! credential row so the callback can find its credential. Provider
//! errors are returned verbatim to the local admin console and sanitised
//! for anything remote.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use mcpbox_core::{Credential, GrantType};

use crate::error::{ApiError, ApiResult};
use crate::services::credentials::CredentialService;

/// Pending flows expire after this long.
const FLOW_TTL: Duration = Duration::from_secs(600);

/// PKCE verifier length; RFC 7636 allows 43–128 characters.
const VERIFIER_LEN: usize = 64;

fn oauth_error(public: impl Into<String>, detail: impl Into<String>) -> ApiError {
    ApiError::OAuth {
        public: public.into(),
        detail: detail.into(),
    }
}

/// A PKCE pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a PKCE verifier and its S256 challenge.
pub fn generate_pkce() -> PkcePair {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let verifier: String = (0..VERIFIER_LEN)
        .map(|_| CHARSET[fastrand::usize(..CHARSET.len())] as char)
        .collect();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair { verifier, challenge }
}

/// Generate a CSRF state nonce.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    for byte in &mut bytes {
        *byte = fastrand::u8(..);
    }
    hex::encode(bytes)
}

struct PendingFlow {
    credential_id: Uuid,
    verifier: String,
    token_url: String,
    redirect_uri: String,
    created_at: Instant,
}

/// Authorisation-server metadata from discovery.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
}

pub struct OAuthService {
    credentials: CredentialService,
    redirect_uri: String,
    http: reqwest::Client,
    pending: Mutex<HashMap<String, PendingFlow>>,
}

impl OAuthService {
    pub fn new(credentials: CredentialService, redirect_uri: String) -> Self {
        Self {
            credentials,
            redirect_uri,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds"),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Remove pending flows older than the TTL; run by the cleanup loop.
    pub fn sweep_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, flow| flow.created_at.elapsed() < FLOW_TTL);
        before - pending.len()
    }

    // === Authorization-code flow ===

    /// Start a PKCE authorization flow; returns the URL to send the admin
    /// to, plus the state nonce.
    pub async fn start_authorization(
        &self,
        credential: &Credential,
    ) -> ApiResult<(String, String)> {
        if credential.oauth_grant_type != Some(GrantType::AuthorizationCode) {
            return Err(ApiError::Validation(
                "credential is not configured for the authorization_code flow".into(),
            ));
        }
        let authorization_url = credential
            .oauth_authorization_url
            .as_deref()
            .ok_or_else(|| ApiError::Validation("credential has no authorization URL".into()))?;
        let token_url = credential
            .oauth_token_url
            .as_deref()
            .ok_or_else(|| ApiError::Validation("credential has no token URL".into()))?;
        let client_id = credential
            .oauth_client_id
            .as_deref()
            .ok_or_else(|| ApiError::Validation("credential has no OAuth client id".into()))?;

        let pkce = generate_pkce();
        let state = generate_state();

        let mut url = url::Url::parse(authorization_url)
            .map_err(|e| ApiError::Validation(format!("invalid authorization URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &state);
        if let Some(scopes) = &credential.oauth_scopes {
            if !scopes.is_empty() {
                url.query_pairs_mut().append_pair("scope", scopes);
            }
        }

        self.pending.lock().insert(
            state.clone(),
            PendingFlow {
                credential_id: credential.id,
                verifier: pkce.verifier,
                token_url: token_url.to_string(),
                redirect_uri: self.redirect_uri.clone(),
                created_at: Instant::now(),
            },
        );

        // Persisting the nonce lets the callback locate the credential
        self.credentials
            .repo()
            .update(
                credential.id,
                mcpbox_storage::repositories::credentials::CredentialChanges {
                    oauth_state: Some(Some(state.clone())),
                    ..Default::default()
                },
            )
            .await?;

        info!(credential = %credential.name, "started OAuth authorization flow");
        Ok((url.to_string(), state))
    }

    /// Exchange the authorization code after the provider redirect.
    pub async fn handle_callback(
        &self,
        credential: &Credential,
        code: &str,
        state: &str,
    ) -> ApiResult<JsonValue> {
        if credential.oauth_state.as_deref() != Some(state) {
            return Err(ApiError::Validation("invalid or expired OAuth state".into()));
        }
        let flow = self
            .pending
            .lock()
            .remove(state)
            .filter(|flow| flow.created_at.elapsed() < FLOW_TTL)
            .ok_or_else(|| ApiError::Validation("invalid or expired OAuth state".into()))?;
        if flow.credential_id != credential.id {
            return Err(ApiError::Validation("invalid or expired OAuth state".into()));
        }

        let client_id = credential
            .oauth_client_id
            .as_deref()
            .ok_or_else(|| ApiError::Validation("credential has no OAuth client id".into()))?;

        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), flow.redirect_uri.clone()),
            ("client_id".to_string(), client_id.to_string()),
            ("code_verifier".to_string(), flow.verifier.clone()),
        ];
        if let Some(secret) = self.credentials.decrypt_client_secret(credential)? {
            form.push(("client_secret".to_string(), secret));
        }

        let tokens = self.post_token_request(&flow.token_url, &form).await?;
        self.store_token_response(credential, &tokens).await?;
        info!(credential = %credential.name, "OAuth authorization complete");

        Ok(serde_json::json!({
            "refresh_token_stored": tokens.get("refresh_token").is_some(),
            "expires_at": expires_at_from(&tokens),
        }))
    }

    /// Refresh an access token with the stored refresh token.
    pub async fn refresh_token(&self, credential: &Credential) -> ApiResult<JsonValue> {
        let token_url = credential
            .oauth_token_url
            .as_deref()
            .ok_or_else(|| ApiError::Validation("credential has no token URL".into()))?;
        let client_id = credential
            .oauth_client_id
            .as_deref()
            .ok_or_else(|| ApiError::Validation("credential has no OAuth client id".into()))?;
        let refresh_token = self.credentials.decrypt_refresh_token(credential)?;

        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
            ("client_id".to_string(), client_id.to_string()),
        ];
        if let Some(secret) = self.credentials.decrypt_client_secret(credential)? {
            form.push(("client_secret".to_string(), secret));
        }

        let tokens = self.post_token_request(token_url, &form).await?;
        self.store_token_response(credential, &tokens).await?;
        info!(credential = %credential.name, "OAuth token refreshed");

        Ok(serde_json::json!({"expires_at": expires_at_from(&tokens)}))
    }

    async fn post_token_request(
        &self,
        token_url: &str,
        form: &[(String, String)],
    ) -> ApiResult<JsonValue> {
        let response = self
            .http
            .post(token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| oauth_error("token endpoint unreachable", e.to_string()))?;

        let status = response.status();
        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| oauth_error("token endpoint returned invalid JSON", e.to_string()))?;

        if !status.is_success() {
            let provider_error = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown provider error")
                .to_string();
            return Err(oauth_error(
                format!("token request failed: {provider_error}"),
                format!("HTTP {status}: {body}"),
            ));
        }
        Ok(body)
    }

    async fn store_token_response(
        &self,
        credential: &Credential,
        tokens: &JsonValue,
    ) -> ApiResult<()> {
        let access_token = tokens
            .get("access_token")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                oauth_error(
                    "token response carried no access_token",
                    tokens.to_string(),
                )
            })?;
        let refresh_token = tokens.get("refresh_token").and_then(JsonValue::as_str);
        self.credentials
            .store_oauth_tokens(credential.id, access_token, refresh_token, expires_at_from(tokens))
            .await
    }

    // === Discovery ===

    /// Discover the authorisation server behind an external MCP endpoint.
    ///
    /// Probes the MCP URL first: a 200 JSON-RPC answer means no OAuth is
    /// needed and setup should stop; a 401 leads through
    /// `WWW-Authenticate` (or the well-known default) to the protected
    /// resource metadata and from there to the authorisation server.
    pub async fn discover(&self, mcp_url: &str) -> ApiResult<AuthServerMetadata> {
        let probe = serde_json::json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "initialize",
            "params": {"protocolVersion": "2025-03-26", "capabilities": {}, "clientInfo": {"name": "mcpbox", "version": "0"}},
        });
        let response = self
            .http
            .post(mcp_url)
            .json(&probe)
            .header("Accept", "application/json, text/event-stream")
            .send()
            .await
            .map_err(|e| oauth_error("MCP server unreachable", e.to_string()))?;

        let status = response.status().as_u16();
        let www_authenticate = response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        if status == 200 {
            let body: JsonValue = response.json().await.unwrap_or_default();
            if body.get("result").is_some() {
                return Err(ApiError::Validation(
                    "server answered without authentication; OAuth setup is not needed".into(),
                ));
            }
        }
        if status != 401 && status != 200 {
            return Err(oauth_error(
                format!("expected 401 from protected server, got HTTP {status}"),
                format!("probe of {mcp_url} returned {status}"),
            ));
        }

        let resource_metadata_url = www_authenticate
            .as_deref()
            .and_then(parse_resource_metadata)
            .unwrap_or_else(|| well_known_for(mcp_url, "oauth-protected-resource"));

        let resource_metadata: JsonValue = self
            .http
            .get(&resource_metadata_url)
            .send()
            .await
            .map_err(|e| oauth_error("protected-resource metadata unreachable", e.to_string()))?
            .json()
            .await
            .map_err(|e| oauth_error("invalid protected-resource metadata", e.to_string()))?;

        let auth_server = resource_metadata
            .get("authorization_servers")
            .and_then(JsonValue::as_array)
            .and_then(|servers| servers.first())
            .and_then(JsonValue::as_str)
            .map(String::from)
            .unwrap_or_else(|| origin_of(mcp_url));

        let metadata_url = well_known_for(&auth_server, "oauth-authorization-server");
        let metadata: AuthServerMetadata = self
            .http
            .get(&metadata_url)
            .send()
            .await
            .map_err(|e| oauth_error("authorization-server metadata unreachable", e.to_string()))?
            .json()
            .await
            .map_err(|e| oauth_error("invalid authorization-server metadata", e.to_string()))?;

        Ok(metadata)
    }

    /// Dynamic client registration, when the server advertises it.
    pub async fn register_client(
        &self,
        registration_endpoint: &str,
        client_name: &str,
    ) -> ApiResult<String> {
        let body: JsonValue = self
            .http
            .post(registration_endpoint)
            .json(&serde_json::json!({
                "client_name": client_name,
                "redirect_uris": [self.redirect_uri],
                "grant_types": ["authorization_code", "refresh_token"],
                "token_endpoint_auth_method": "none",
            }))
            .send()
            .await
            .map_err(|e| oauth_error("registration endpoint unreachable", e.to_string()))?
            .json()
            .await
            .map_err(|e| oauth_error("invalid registration response", e.to_string()))?;

        body.get("client_id")
            .and_then(JsonValue::as_str)
            .map(String::from)
            .ok_or_else(|| {
                warn!("dynamic registration response carried no client_id");
                oauth_error("registration response carried no client_id", body.to_string())
            })
    }
}

fn expires_at_from(tokens: &JsonValue) -> Option<chrono::DateTime<chrono::Utc>> {
    tokens
        .get("expires_in")
        .and_then(JsonValue::as_i64)
        .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds))
}

/// Pull `resource_metadata="…"` out of a WWW-Authenticate header.
fn parse_resource_metadata(header: &str) -> Option<String> {
    let marker = "resource_metadata=";
    let start = header.find(marker)? + marker.len();
    let rest = &header[start..];
    let rest = rest.strip_prefix('"').unwrap_or(rest);
    let end = rest.find('"').unwrap_or_else(|| {
        rest.find([',', ' ']).unwrap_or(rest.len())
    });
    Some(rest[..end].to_string())
}

fn origin_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let mut origin = format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or(""));
            if let Some(port) = parsed.port() {
                origin.push_str(&format!(":{port}"));
            }
            origin
        }
        Err(_) => url.to_string(),
    }
}

fn well_known_for(base: &str, suffix: &str) -> String {
    format!("{}/.well-known/{suffix}", origin_of(base).trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_pair_is_long_and_deterministic_under_s256() {
        let pair = generate_pkce();
        assert!(pair.verifier.len() >= 43);
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
        // No padding in the challenge
        assert!(!pair.challenge.contains('='));
    }

    #[test]
    fn state_nonces_are_unique() {
        assert_ne!(generate_state(), generate_state());
        assert_eq!(generate_state().len(), 48);
    }

    #[test]
    fn www_authenticate_parsing() {
        assert_eq!(
            parse_resource_metadata(
                r#"Bearer resource_metadata="https://mcp.example/.well-known/oauth-protected-resource""#
            ),
            Some("https://mcp.example/.well-known/oauth-protected-resource".to_string())
        );
        assert_eq!(
            parse_resource_metadata("Bearer realm=\"x\", resource_metadata=https://a.b/meta"),
            Some("https://a.b/meta".to_string())
        );
        assert_eq!(parse_resource_metadata("Bearer realm=\"x\""), None);
    }

    #[test]
    fn well_known_urls_are_origin_relative() {
        assert_eq!(
            well_known_for("https://mcp.example:8443/v1/mcp", "oauth-protected-resource"),
            "https://mcp.example:8443/.well-known/oauth-protected-resource"
        );
        assert_eq!(
            well_known_for("https://auth.example", "oauth-authorization-server"),
            "https://auth.example/.well-known/oauth-authorization-server"
        );
    }
}
