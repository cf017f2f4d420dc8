//! Credential store service
//!
//! Each secret field is encrypted independently under its own AAD
//! ("value", "username", "password", "access_token", "refresh_token",
//! "oauth_client_secret"), so ciphertexts cannot migrate between columns.
//! Reads surface redacted views; decrypted material exists only on the
//! injection path.

use tracing::warn;
use uuid::Uuid;

use mcpbox_core::{AuthType, Credential, CredentialForInjection, CredentialView, GrantType};
use mcpbox_crypto::{decrypt, encrypt, EncryptionKey};
use mcpbox_storage::repositories::credentials::{CredentialChanges, NewCredential};
use mcpbox_storage::CredentialRepo;

use crate::error::{ApiError, ApiResult};

/// AAD tags, one per encrypted column.
pub mod aad {
    pub const VALUE: &str = "value";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const OAUTH_CLIENT_SECRET: &str = "oauth_client_secret";
}

/// Plaintext input for creating a credential.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CredentialInput {
    pub name: String,
    pub description: Option<String>,
    pub auth_type: AuthType,
    pub header_name: Option<String>,
    pub query_param_name: Option<String>,
    pub value: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub oauth_token_url: Option<String>,
    pub oauth_authorization_url: Option<String>,
    pub oauth_scopes: Option<String>,
    pub oauth_grant_type: Option<GrantType>,
}

#[derive(Clone)]
pub struct CredentialService {
    repo: CredentialRepo,
    key: EncryptionKey,
}

impl CredentialService {
    pub fn new(repo: CredentialRepo, key: EncryptionKey) -> Self {
        Self { repo, key }
    }

    pub fn repo(&self) -> &CredentialRepo {
        &self.repo
    }

    fn encrypt_field(
        &self,
        value: &Option<String>,
        aad: &str,
        name: &str,
    ) -> ApiResult<Option<Vec<u8>>> {
        match value {
            Some(plaintext) => encrypt(&self.key, plaintext, aad).map(Some).map_err(|e| {
                ApiError::internal(format!("failed to encrypt credential '{name}' ({aad}): {e}"))
            }),
            None => Ok(None),
        }
    }

    pub async fn create(
        &self,
        server_id: Uuid,
        input: CredentialInput,
    ) -> ApiResult<CredentialView> {
        if input.name.trim().is_empty() {
            return Err(ApiError::Validation("credential name must not be empty".into()));
        }

        let new = NewCredential {
            encrypted_value: self.encrypt_field(&input.value, aad::VALUE, &input.name)?,
            encrypted_username: self.encrypt_field(&input.username, aad::USERNAME, &input.name)?,
            encrypted_password: self.encrypt_field(&input.password, aad::PASSWORD, &input.name)?,
            encrypted_access_token: self.encrypt_field(
                &input.access_token,
                aad::ACCESS_TOKEN,
                &input.name,
            )?,
            encrypted_refresh_token: self.encrypt_field(
                &input.refresh_token,
                aad::REFRESH_TOKEN,
                &input.name,
            )?,
            oauth_client_secret: self.encrypt_field(
                &input.oauth_client_secret,
                aad::OAUTH_CLIENT_SECRET,
                &input.name,
            )?,
            name: input.name,
            description: input.description,
            auth_type: input.auth_type,
            header_name: input.header_name,
            query_param_name: input.query_param_name,
            oauth_client_id: input.oauth_client_id,
            oauth_token_url: input.oauth_token_url,
            oauth_authorization_url: input.oauth_authorization_url,
            oauth_scopes: input.oauth_scopes,
            oauth_grant_type: input.oauth_grant_type,
        };
        let credential = self.repo.create(server_id, new).await?;
        Ok(credential.to_view())
    }

    pub async fn get(&self, id: Uuid) -> ApiResult<CredentialView> {
        Ok(self.repo.get(id).await?.to_view())
    }

    pub async fn list_views(&self, server_id: Uuid) -> ApiResult<Vec<CredentialView>> {
        Ok(self
            .repo
            .list_by_server(server_id)
            .await?
            .iter()
            .map(Credential::to_view)
            .collect())
    }

    /// Update secret fields; `None` leaves a field untouched.
    pub async fn update_secrets(
        &self,
        id: Uuid,
        value: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> ApiResult<CredentialView> {
        let current = self.repo.get(id).await?;
        let changes = CredentialChanges {
            encrypted_value: match value {
                Some(v) => Some(self.encrypt_field(&Some(v), aad::VALUE, &current.name)?),
                None => None,
            },
            encrypted_username: match username {
                Some(v) => Some(self.encrypt_field(&Some(v), aad::USERNAME, &current.name)?),
                None => None,
            },
            encrypted_password: match password {
                Some(v) => Some(self.encrypt_field(&Some(v), aad::PASSWORD, &current.name)?),
                None => None,
            },
            ..Default::default()
        };
        Ok(self.repo.update(id, changes).await?.to_view())
    }

    pub async fn delete(&self, id: Uuid) -> ApiResult<bool> {
        Ok(self.repo.delete(id).await?)
    }

    /// Store freshly obtained OAuth tokens.
    pub async fn store_oauth_tokens(
        &self,
        id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> ApiResult<()> {
        let changes = CredentialChanges {
            encrypted_access_token: Some(Some(encrypt(&self.key, access_token, aad::ACCESS_TOKEN)?)),
            encrypted_refresh_token: match refresh_token {
                Some(token) => Some(Some(encrypt(&self.key, token, aad::REFRESH_TOKEN)?)),
                None => None,
            },
            access_token_expires_at: Some(expires_at),
            oauth_state: Some(None),
            ..Default::default()
        };
        self.repo.update(id, changes).await?;
        Ok(())
    }

    pub fn decrypt_refresh_token(&self, credential: &Credential) -> ApiResult<String> {
        let blob = credential
            .encrypted_refresh_token
            .as_deref()
            .ok_or_else(|| ApiError::Validation("credential has no refresh token".into()))?;
        Ok(decrypt(&self.key, blob, aad::REFRESH_TOKEN)?)
    }

    pub fn decrypt_client_secret(&self, credential: &Credential) -> ApiResult<Option<String>> {
        match credential.oauth_client_secret.as_deref() {
            Some(blob) => Ok(Some(decrypt(&self.key, blob, aad::OAUTH_CLIENT_SECRET)?)),
            None => Ok(None),
        }
    }

    /// Decrypted credentials for sandbox injection. A field that fails to
    /// decrypt becomes `None` with a warning; the remaining credentials
    /// are still returned.
    pub async fn for_injection(&self, server_id: Uuid) -> ApiResult<Vec<CredentialForInjection>> {
        let credentials = self.repo.list_by_server(server_id).await?;
        Ok(credentials
            .iter()
            .map(|cred| CredentialForInjection {
                name: cred.name.clone(),
                auth_type: cred.auth_type,
                header_name: cred.header_name.clone(),
                query_param_name: cred.query_param_name.clone(),
                value: self.decrypt_opt(&cred.encrypted_value, aad::VALUE),
                username: self.decrypt_opt(&cred.encrypted_username, aad::USERNAME),
                password: self.decrypt_opt(&cred.encrypted_password, aad::PASSWORD),
                access_token: self.decrypt_opt(&cred.encrypted_access_token, aad::ACCESS_TOKEN),
            })
            .collect())
    }

    fn decrypt_opt(&self, blob: &Option<Vec<u8>>, aad: &str) -> Option<String> {
        match blob {
            Some(blob) => match decrypt(&self.key, blob, aad) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(aad, error = %e, "failed to decrypt credential field");
                    None
                }
            },
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbox_storage::db::connect_test;
    use mcpbox_storage::ServerRepo;

    async fn service() -> (CredentialService, Uuid) {
        let db = connect_test().await;
        let server = ServerRepo::new(db.clone()).create("s", None).await.unwrap();
        let service =
            CredentialService::new(CredentialRepo::new(db), EncryptionKey::from_bytes([9u8; 32]));
        (service, server.id)
    }

    fn input(name: &str) -> CredentialInput {
        CredentialInput {
            name: name.to_string(),
            auth_type: AuthType::Bearer,
            value: Some("sk-secret".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn views_never_contain_plaintext() {
        let (service, server_id) = service().await;
        let view = service.create(server_id, input("github")).await.unwrap();
        assert!(view.has_value);

        let rendered = serde_json::to_string(&view).unwrap();
        assert!(!rendered.contains("sk-secret"));
    }

    #[tokio::test]
    async fn injection_decrypts_fields() {
        let (service, server_id) = service().await;
        let mut credential = input("api");
        credential.username = Some("bob".to_string());
        credential.password = Some("hunter2".to_string());
        service.create(server_id, credential).await.unwrap();

        let injected = service.for_injection(server_id).await.unwrap();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].value.as_deref(), Some("sk-secret"));
        assert_eq!(injected[0].username.as_deref(), Some("bob"));
        assert_eq!(injected[0].password.as_deref(), Some("hunter2"));
        assert!(injected[0].access_token.is_none());
    }

    #[tokio::test]
    async fn oauth_token_storage_round_trip() {
        let (service, server_id) = service().await;
        let mut credential = input("oauth");
        credential.auth_type = AuthType::Oauth2;
        let view = service.create(server_id, credential).await.unwrap();

        service
            .store_oauth_tokens(view.id, "at-1", Some("rt-1"), None)
            .await
            .unwrap();

        let stored = service.repo().get(view.id).await.unwrap();
        assert_eq!(service.decrypt_refresh_token(&stored).unwrap(), "rt-1");

        let injected = service.for_injection(server_id).await.unwrap();
        assert_eq!(injected[0].access_token.as_deref(), Some("at-1"));
    }

    #[tokio::test]
    async fn corrupted_field_degrades_to_none() {
        let (service, server_id) = service().await;
        let view = service.create(server_id, input("x")).await.unwrap();

        // Corrupt the stored ciphertext
        service
            .repo()
            .update(
                view.id,
                CredentialChanges {
                    encrypted_value: Some(Some(vec![0u8; 40])),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let injected = service.for_injection(server_id).await.unwrap();
        assert_eq!(injected.len(), 1);
        assert!(injected[0].value.is_none());
    }

    #[tokio::test]
    async fn empty_name_is_a_validation_error() {
        let (service, server_id) = service().await;
        let err = service.create(server_id, input("  ")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
