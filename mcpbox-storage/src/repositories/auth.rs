//! Admin user and token blacklist repository

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use mcpbox_core::{AdminUser, TokenBlacklistEntry};

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::repositories::get_uuid;

#[derive(Clone)]
pub struct AuthRepo {
    db: Database,
}

impl AuthRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn map_user(row: &SqliteRow) -> StorageResult<AdminUser> {
        Ok(AdminUser {
            id: get_uuid(row, "id")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            password_version: row.try_get("password_version")?,
            is_active: row.try_get("is_active")?,
            last_login_at: row.try_get("last_login_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn user_count(&self) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admin_users")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.0)
    }

    pub async fn create_user(&self, username: &str, password_hash: &str) -> StorageResult<AdminUser> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO admin_users (id, username, password_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(username)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::from_sqlx(e, "username"))?;
        self.get_user(id).await
    }

    pub async fn get_user(&self, id: Uuid) -> StorageResult<AdminUser> {
        let row = sqlx::query("SELECT * FROM admin_users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {id}")))?;
        Self::map_user(&row)
    }

    pub async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<AdminUser>> {
        let row = sqlx::query("SELECT * FROM admin_users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(Self::map_user).transpose()
    }

    /// Store a new hash and bump the password version, invalidating every
    /// outstanding JWT.
    pub async fn change_password(&self, id: Uuid, password_hash: &str) -> StorageResult<AdminUser> {
        let result = sqlx::query(
            "UPDATE admin_users SET password_hash = ?, password_version = password_version + 1,
             updated_at = ? WHERE id = ?",
        )
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {id}")));
        }
        self.get_user(id).await
    }

    pub async fn touch_last_login(&self, id: Uuid) -> StorageResult<()> {
        sqlx::query("UPDATE admin_users SET last_login_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    // === Token blacklist ===

    pub async fn blacklist_token(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO token_blacklist (jti, expires_at, created_at) VALUES (?, ?, ?)
             ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn is_token_blacklisted(&self, jti: &str) -> StorageResult<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM token_blacklist WHERE jti = ? AND expires_at >= ?",
        )
        .bind(jti)
        .bind(Utc::now())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.0 > 0)
    }

    /// Live blacklist entries, used to seed the in-memory mirror.
    pub async fn active_blacklist(&self) -> StorageResult<Vec<TokenBlacklistEntry>> {
        let rows = sqlx::query("SELECT * FROM token_blacklist WHERE expires_at >= ?")
            .bind(Utc::now())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(TokenBlacklistEntry {
                    jti: row.try_get("jti")?,
                    expires_at: row.try_get("expires_at")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Remove rows whose tokens have expired naturally.
    pub async fn purge_expired_tokens(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test;
    use chrono::Duration;

    #[tokio::test]
    async fn user_lifecycle() {
        let repo = AuthRepo::new(connect_test().await);
        assert_eq!(repo.user_count().await.unwrap(), 0);

        let user = repo.create_user("admin", "$argon2id$hash").await.unwrap();
        assert_eq!(user.password_version, 1);
        assert!(user.is_active);

        let changed = repo.change_password(user.id, "$argon2id$new").await.unwrap();
        assert_eq!(changed.password_version, 2);

        assert!(matches!(
            repo.create_user("admin", "$x").await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn blacklist_respects_expiry() {
        let repo = AuthRepo::new(connect_test().await);
        repo.blacklist_token("live", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        repo.blacklist_token("dead", Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        assert!(repo.is_token_blacklisted("live").await.unwrap());
        assert!(!repo.is_token_blacklisted("dead").await.unwrap());
        assert!(!repo.is_token_blacklisted("unknown").await.unwrap());

        let purged = repo.purge_expired_tokens().await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.active_blacklist().await.unwrap().len(), 1);
    }
}
