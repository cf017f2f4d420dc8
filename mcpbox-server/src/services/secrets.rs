//! Server secret service
//!
//! Secrets are encrypted with the key name as AAD, the same
//! context-tagging discipline the credential store uses per field: a
//! ciphertext copied from one key cannot be replayed under another.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use mcpbox_core::ServerSecret;
use mcpbox_crypto::{decrypt, encrypt, EncryptionKey};
use mcpbox_storage::ServerRepo;

use crate::error::ApiResult;

#[derive(Clone)]
pub struct SecretService {
    repo: ServerRepo,
    key: EncryptionKey,
}

impl SecretService {
    pub fn new(repo: ServerRepo, key: EncryptionKey) -> Self {
        Self { repo, key }
    }

    pub async fn set(
        &self,
        server_id: Uuid,
        key_name: &str,
        value: &str,
        description: Option<&str>,
    ) -> ApiResult<ServerSecret> {
        let ciphertext = encrypt(&self.key, value, key_name)?;
        Ok(self
            .repo
            .upsert_secret(server_id, key_name, &ciphertext, description)
            .await?)
    }

    /// Key names only; values never leave this service except for
    /// injection.
    pub async fn list_keys(&self, server_id: Uuid) -> ApiResult<Vec<String>> {
        Ok(self
            .repo
            .list_secrets(server_id)
            .await?
            .into_iter()
            .map(|s| s.key_name)
            .collect())
    }

    pub async fn delete(&self, server_id: Uuid, key_name: &str) -> ApiResult<bool> {
        Ok(self.repo.delete_secret(server_id, key_name).await?)
    }

    /// Decrypted map for sandbox injection. A secret that fails to decrypt
    /// is skipped with a warning; the rest still inject.
    pub async fn decrypted_for_injection(
        &self,
        server_id: Uuid,
    ) -> ApiResult<HashMap<String, String>> {
        let secrets = self.repo.list_secrets(server_id).await?;
        let mut out = HashMap::with_capacity(secrets.len());
        for secret in secrets {
            match decrypt(&self.key, &secret.encrypted_value, &secret.key_name) {
                Ok(value) => {
                    out.insert(secret.key_name, value);
                }
                Err(e) => {
                    warn!(key = %secret.key_name, error = %e, "skipping undecryptable secret");
                }
            }
        }
        Ok(out)
    }
}
