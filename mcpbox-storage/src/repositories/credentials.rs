//! Credential repository

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use mcpbox_core::{AuthType, Credential, GrantType};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::repositories::{get_enum, get_opt_enum, get_uuid};

/// Encrypted field updates; `Some(None)` clears a column.
#[derive(Debug, Clone, Default)]
pub struct CredentialChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub encrypted_value: Option<Option<Vec<u8>>>,
    pub encrypted_username: Option<Option<Vec<u8>>>,
    pub encrypted_password: Option<Option<Vec<u8>>>,
    pub encrypted_access_token: Option<Option<Vec<u8>>>,
    pub encrypted_refresh_token: Option<Option<Vec<u8>>>,
    pub access_token_expires_at: Option<Option<DateTime<Utc>>>,
    pub oauth_state: Option<Option<String>>,
}

/// Fields for a new credential.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub name: String,
    pub description: Option<String>,
    pub auth_type: AuthType,
    pub header_name: Option<String>,
    pub query_param_name: Option<String>,
    pub encrypted_value: Option<Vec<u8>>,
    pub encrypted_username: Option<Vec<u8>>,
    pub encrypted_password: Option<Vec<u8>>,
    pub encrypted_access_token: Option<Vec<u8>>,
    pub encrypted_refresh_token: Option<Vec<u8>>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<Vec<u8>>,
    pub oauth_token_url: Option<String>,
    pub oauth_authorization_url: Option<String>,
    pub oauth_scopes: Option<String>,
    pub oauth_grant_type: Option<GrantType>,
}

#[derive(Clone)]
pub struct CredentialRepo {
    db: Database,
}

impl CredentialRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn map(row: &SqliteRow) -> StorageResult<Credential> {
        Ok(Credential {
            id: get_uuid(row, "id")?,
            server_id: get_uuid(row, "server_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            auth_type: get_enum::<AuthType>(row, "auth_type")?,
            header_name: row.try_get("header_name")?,
            query_param_name: row.try_get("query_param_name")?,
            encrypted_value: row.try_get("encrypted_value")?,
            encrypted_username: row.try_get("encrypted_username")?,
            encrypted_password: row.try_get("encrypted_password")?,
            encrypted_access_token: row.try_get("encrypted_access_token")?,
            encrypted_refresh_token: row.try_get("encrypted_refresh_token")?,
            oauth_client_id: row.try_get("oauth_client_id")?,
            oauth_client_secret: row.try_get("oauth_client_secret")?,
            oauth_token_url: row.try_get("oauth_token_url")?,
            oauth_authorization_url: row.try_get("oauth_authorization_url")?,
            oauth_scopes: row.try_get("oauth_scopes")?,
            oauth_grant_type: get_opt_enum::<GrantType>(row, "oauth_grant_type")?,
            oauth_state: row.try_get("oauth_state")?,
            access_token_expires_at: row.try_get("access_token_expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn create(&self, server_id: Uuid, new: NewCredential) -> StorageResult<Credential> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO credentials
             (id, server_id, name, description, auth_type, header_name, query_param_name,
              encrypted_value, encrypted_username, encrypted_password, encrypted_access_token,
              encrypted_refresh_token, oauth_client_id, oauth_client_secret, oauth_token_url,
              oauth_authorization_url, oauth_scopes, oauth_grant_type, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.auth_type.as_str())
        .bind(&new.header_name)
        .bind(&new.query_param_name)
        .bind(&new.encrypted_value)
        .bind(&new.encrypted_username)
        .bind(&new.encrypted_password)
        .bind(&new.encrypted_access_token)
        .bind(&new.encrypted_refresh_token)
        .bind(&new.oauth_client_id)
        .bind(&new.oauth_client_secret)
        .bind(&new.oauth_token_url)
        .bind(&new.oauth_authorization_url)
        .bind(&new.oauth_scopes)
        .bind(new.oauth_grant_type.map(|g| g.as_str()))
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "credential name"))?;
        self.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> StorageResult<Credential> {
        let row = sqlx::query("SELECT * FROM credentials WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("credential {id}")))?;
        Self::map(&row)
    }

    pub async fn list_by_server(&self, server_id: Uuid) -> StorageResult<Vec<Credential>> {
        let rows =
            sqlx::query("SELECT * FROM credentials WHERE server_id = ? ORDER BY created_at ASC")
                .bind(server_id.to_string())
                .fetch_all(self.db.pool())
                .await?;
        rows.iter().map(Self::map).collect()
    }

    pub async fn update(&self, id: Uuid, changes: CredentialChanges) -> StorageResult<Credential> {
        let current = self.get(id).await?;
        let name = changes.name.unwrap_or(current.name);
        let description = changes.description.unwrap_or(current.description);
        let encrypted_value = changes.encrypted_value.unwrap_or(current.encrypted_value);
        let encrypted_username = changes
            .encrypted_username
            .unwrap_or(current.encrypted_username);
        let encrypted_password = changes
            .encrypted_password
            .unwrap_or(current.encrypted_password);
        let encrypted_access_token = changes
            .encrypted_access_token
            .unwrap_or(current.encrypted_access_token);
        let encrypted_refresh_token = changes
            .encrypted_refresh_token
            .unwrap_or(current.encrypted_refresh_token);
        let access_token_expires_at = changes
            .access_token_expires_at
            .unwrap_or(current.access_token_expires_at);
        let oauth_state = changes.oauth_state.unwrap_or(current.oauth_state);

        sqlx::query(
            "UPDATE credentials SET name = ?, description = ?, encrypted_value = ?,
             encrypted_username = ?, encrypted_password = ?, encrypted_access_token = ?,
             encrypted_refresh_token = ?, access_token_expires_at = ?, oauth_state = ?,
             updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&description)
        .bind(&encrypted_value)
        .bind(&encrypted_username)
        .bind(&encrypted_password)
        .bind(&encrypted_access_token)
        .bind(&encrypted_refresh_token)
        .bind(access_token_expires_at)
        .bind(&oauth_state)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "credential name"))?;
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// OAuth2 credentials whose token expires before `threshold` and which
    /// hold a refresh token: the refresh loop's work list.
    pub async fn list_expiring(
        &self,
        threshold: DateTime<Utc>,
    ) -> StorageResult<Vec<Credential>> {
        let rows = sqlx::query(
            "SELECT * FROM credentials
             WHERE auth_type = 'oauth2'
               AND encrypted_refresh_token IS NOT NULL
               AND access_token_expires_at IS NOT NULL
               AND access_token_expires_at < ?
             ORDER BY access_token_expires_at ASC",
        )
        .bind(threshold)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Self::map).collect()
    }

    pub async fn find_by_oauth_state(&self, state: &str) -> StorageResult<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE oauth_state = ?")
            .bind(state)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(Self::map).transpose()
    }

    /// Every credential row, for the key-rotation walk.
    pub async fn list_all(&self) -> StorageResult<Vec<Credential>> {
        let rows = sqlx::query("SELECT * FROM credentials ORDER BY created_at ASC")
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(Self::map).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test;
    use crate::repositories::servers::ServerRepo;
    use chrono::Duration;

    fn new_credential(name: &str, auth_type: AuthType) -> NewCredential {
        NewCredential {
            name: name.to_string(),
            description: None,
            auth_type,
            header_name: None,
            query_param_name: None,
            encrypted_value: Some(vec![1, 2, 3]),
            encrypted_username: None,
            encrypted_password: None,
            encrypted_access_token: None,
            encrypted_refresh_token: None,
            oauth_client_id: None,
            oauth_client_secret: None,
            oauth_token_url: None,
            oauth_authorization_url: None,
            oauth_scopes: None,
            oauth_grant_type: None,
        }
    }

    async fn setup() -> (CredentialRepo, Uuid) {
        let db = connect_test().await;
        let server = ServerRepo::new(db.clone()).create("s", None).await.unwrap();
        (CredentialRepo::new(db), server.id)
    }

    #[tokio::test]
    async fn create_and_update_round_trip() {
        let (repo, server_id) = setup().await;
        let cred = repo
            .create(server_id, new_credential("github", AuthType::Bearer))
            .await
            .unwrap();
        assert_eq!(cred.encrypted_value.as_deref(), Some(&[1u8, 2, 3][..]));

        let updated = repo
            .update(
                cred.id,
                CredentialChanges {
                    encrypted_value: Some(Some(vec![9, 9])),
                    oauth_state: Some(Some("nonce".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.encrypted_value.as_deref(), Some(&[9u8, 9][..]));
        assert_eq!(updated.oauth_state.as_deref(), Some("nonce"));

        let found = repo.find_by_oauth_state("nonce").await.unwrap();
        assert_eq!(found.unwrap().id, cred.id);
    }

    #[tokio::test]
    async fn expiring_filter_matches_only_refreshable_oauth() {
        let (repo, server_id) = setup().await;
        let soon = Utc::now() + Duration::minutes(5);

        // Expiring, refreshable
        let mut oauth = new_credential("a", AuthType::Oauth2);
        oauth.encrypted_refresh_token = Some(vec![1]);
        let a = repo.create(server_id, oauth).await.unwrap();
        repo.update(
            a.id,
            CredentialChanges {
                access_token_expires_at: Some(Some(soon)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Expiring but no refresh token
        let b = repo
            .create(server_id, new_credential("b", AuthType::Oauth2))
            .await
            .unwrap();
        repo.update(
            b.id,
            CredentialChanges {
                access_token_expires_at: Some(Some(soon)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Not oauth at all
        repo.create(server_id, new_credential("c", AuthType::Bearer))
            .await
            .unwrap();

        let expiring = repo
            .list_expiring(Utc::now() + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].name, "a");
    }
}
