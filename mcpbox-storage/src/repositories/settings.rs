//! Settings repository

use chrono::Utc;
use sqlx::Row;

use mcpbox_core::Setting;

use crate::db::Database;
use crate::error::StorageResult;

#[derive(Clone)]
pub struct SettingRepo {
    db: Database,
}

impl SettingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<Setting>> {
        let row = sqlx::query("SELECT * FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        match row {
            Some(row) => Ok(Some(Setting {
                key: row.try_get("key")?,
                value: row.try_get("value")?,
                encrypted: row.try_get("encrypted")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    /// Plain value with a fallback.
    pub async fn get_value_or(&self, key: &str, default: &str) -> StorageResult<String> {
        Ok(self
            .get(key)
            .await?
            .and_then(|s| s.value)
            .unwrap_or_else(|| default.to_string()))
    }

    pub async fn set(&self, key: &str, value: Option<&str>, encrypted: bool) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, encrypted, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value,
                                             encrypted = excluded.encrypted,
                                             updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(encrypted)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self) -> StorageResult<Vec<Setting>> {
        let rows = sqlx::query("SELECT * FROM settings ORDER BY key ASC")
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Setting {
                    key: row.try_get("key")?,
                    value: row.try_get("value")?,
                    encrypted: row.try_get("encrypted")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test;
    use mcpbox_core::setting::{keys, APPROVAL_MODE_REQUIRE};

    #[tokio::test]
    async fn set_get_overwrite_delete() {
        let repo = SettingRepo::new(connect_test().await);

        assert!(repo.get(keys::TOOL_APPROVAL_MODE).await.unwrap().is_none());
        assert_eq!(
            repo.get_value_or(keys::TOOL_APPROVAL_MODE, APPROVAL_MODE_REQUIRE)
                .await
                .unwrap(),
            APPROVAL_MODE_REQUIRE
        );

        repo.set(keys::TOOL_APPROVAL_MODE, Some("auto_approve"), false)
            .await
            .unwrap();
        assert_eq!(
            repo.get(keys::TOOL_APPROVAL_MODE).await.unwrap().unwrap().value.as_deref(),
            Some("auto_approve")
        );

        repo.set(keys::SERVICE_TOKEN, Some("base64-ciphertext"), true)
            .await
            .unwrap();
        let setting = repo.get(keys::SERVICE_TOKEN).await.unwrap().unwrap();
        assert!(setting.encrypted);

        assert!(repo.delete(keys::SERVICE_TOKEN).await.unwrap());
        assert!(!repo.delete(keys::SERVICE_TOKEN).await.unwrap());
    }
}
