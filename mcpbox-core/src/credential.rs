//! Credential entity and its redacted views
//!
//! No plaintext secret ever leaves a read path: API-facing views carry
//! `has_*` booleans, and decrypted material only travels through
//! [`CredentialForInjection`] on the loopback channel to the sandbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AuthType, GrantType};

/// Auth material for outbound HTTP or OAuth, encrypted at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub auth_type: AuthType,
    pub header_name: Option<String>,
    pub query_param_name: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_value: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub encrypted_username: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub encrypted_password: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub encrypted_access_token: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub encrypted_refresh_token: Option<Vec<u8>>,
    // OAuth 2.1 client configuration
    pub oauth_client_id: Option<String>,
    #[serde(skip_serializing)]
    pub oauth_client_secret: Option<Vec<u8>>,
    pub oauth_token_url: Option<String>,
    pub oauth_authorization_url: Option<String>,
    pub oauth_scopes: Option<String>,
    pub oauth_grant_type: Option<GrantType>,
    /// CSRF nonce while an authorization-code flow is pending.
    pub oauth_state: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Build the redacted view surfaced by every read endpoint.
    pub fn to_view(&self) -> CredentialView {
        CredentialView {
            id: self.id,
            server_id: self.server_id,
            name: self.name.clone(),
            description: self.description.clone(),
            auth_type: self.auth_type,
            header_name: self.header_name.clone(),
            query_param_name: self.query_param_name.clone(),
            has_value: self.encrypted_value.is_some(),
            has_username: self.encrypted_username.is_some(),
            has_password: self.encrypted_password.is_some(),
            has_access_token: self.encrypted_access_token.is_some(),
            has_refresh_token: self.encrypted_refresh_token.is_some(),
            oauth_client_id: self.oauth_client_id.clone(),
            has_oauth_client_secret: self.oauth_client_secret.is_some(),
            oauth_token_url: self.oauth_token_url.clone(),
            oauth_authorization_url: self.oauth_authorization_url.clone(),
            oauth_scopes: self.oauth_scopes.clone(),
            oauth_grant_type: self.oauth_grant_type,
            oauth_flow_pending: self.oauth_state.is_some(),
            access_token_expires_at: self.access_token_expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Redacted credential representation: presence booleans, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialView {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub auth_type: AuthType,
    pub header_name: Option<String>,
    pub query_param_name: Option<String>,
    pub has_value: bool,
    pub has_username: bool,
    pub has_password: bool,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub oauth_client_id: Option<String>,
    pub has_oauth_client_secret: bool,
    pub oauth_token_url: Option<String>,
    pub oauth_authorization_url: Option<String>,
    pub oauth_scopes: Option<String>,
    pub oauth_grant_type: Option<GrantType>,
    pub oauth_flow_pending: bool,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted credential material handed to the sandbox over loopback.
///
/// Fields that failed to decrypt are `None`; the remaining fields are
/// still usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialForInjection {
    pub name: String,
    pub auth_type: AuthType,
    pub header_name: Option<String>,
    pub query_param_name: Option<String>,
    pub value: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
}
