//! Admin user and token blacklist entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single administrator account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: Uuid,
    pub username: String,
    /// Argon2id PHC string; never serialised.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Incremented on every password change; embedded in JWTs as `pv` so a
    /// change invalidates every outstanding token.
    pub password_version: i64,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A revoked JWT, identified by its `jti`. Rows expire with the token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBlacklistEntry {
    pub jti: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TokenBlacklistEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn password_hash_is_not_serialised() {
        let user = AdminUser {
            id: Uuid::new_v4(),
            username: "admin".to_string(),
            password_hash: "$argon2id$v=19$...".to_string(),
            password_version: 1,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2id"));
    }

    #[test]
    fn blacklist_expiry() {
        let now = Utc::now();
        let entry = TokenBlacklistEntry {
            jti: "abc".to_string(),
            expires_at: now - Duration::seconds(1),
            created_at: now - Duration::hours(1),
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - Duration::seconds(2)));
    }
}
