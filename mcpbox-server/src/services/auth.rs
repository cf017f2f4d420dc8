//! Auth plane: Argon2id login, JWT issuance and validation, JTI blacklist
//!
//! Every token embeds the user's `password_version` (`pv`); a password
//! change bumps the version and thereby invalidates every outstanding
//! token. Logout writes the token's `jti` to the database blacklist and
//! mirrors it in memory for O(1) middleware checks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use mcpbox_core::AdminUser;
use mcpbox_crypto::{dummy_verify, hash_password, verify_password};
use mcpbox_storage::AuthRepo;

use crate::error::{ApiError, ApiResult};

/// Login attempts allowed per IP per minute.
const LOGIN_ATTEMPTS_PER_MINUTE: usize = 5;
const LOGIN_WINDOW: Duration = Duration::from_secs(60);

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// "access" or "refresh".
    #[serde(rename = "type")]
    pub token_type: String,
    /// Password version at issue time.
    pub pv: i64,
    /// Unique id, blacklisted on logout.
    pub jti: String,
}

/// Issued token pair.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

pub struct AuthService {
    repo: AuthRepo,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    /// In-memory mirror of the DB blacklist: jti → expiry.
    revoked: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Login attempts per client IP.
    login_attempts: Mutex<HashMap<String, Vec<Instant>>>,
}

impl AuthService {
    pub fn new(repo: AuthRepo, jwt_secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            repo,
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            access_ttl,
            refresh_ttl,
            revoked: Mutex::new(HashMap::new()),
            login_attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn repo(&self) -> &AuthRepo {
        &self.repo
    }

    /// Seed the in-memory blacklist mirror from the database.
    pub async fn load_blacklist(&self) -> ApiResult<usize> {
        let entries = self.repo.active_blacklist().await?;
        let mut revoked = self.revoked.lock();
        revoked.clear();
        for entry in &entries {
            revoked.insert(entry.jti.clone(), entry.expires_at);
        }
        Ok(entries.len())
    }

    // === Login rate limiting ===

    /// Record a login attempt; error when the per-IP budget is spent.
    pub fn check_login_rate(&self, client_ip: &str) -> ApiResult<()> {
        let now = Instant::now();
        let mut attempts = self.login_attempts.lock();
        let entry = attempts.entry(client_ip.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < LOGIN_WINDOW);
        if entry.len() >= LOGIN_ATTEMPTS_PER_MINUTE {
            return Err(ApiError::RateLimited { retry_after_secs: 60 });
        }
        entry.push(now);
        Ok(())
    }

    // === Account management ===

    /// First-run bootstrap; exactly one admin may exist.
    pub async fn create_admin(&self, username: &str, password: &str) -> ApiResult<AdminUser> {
        if self.repo.user_count().await? > 0 {
            return Err(ApiError::Conflict("admin user already exists".into()));
        }
        if password.len() < 12 {
            return Err(ApiError::Validation(
                "password must be at least 12 characters".into(),
            ));
        }
        let hash = hash_password(password)?;
        let user = self.repo.create_user(username, &hash).await?;
        info!(username, "created admin user");
        Ok(user)
    }

    pub async fn admin_exists(&self) -> ApiResult<bool> {
        Ok(self.repo.user_count().await? > 0)
    }

    /// Authenticate a username/password pair.
    ///
    /// Unknown users burn a dummy hash so timing does not reveal which
    /// usernames exist, and both failure modes return the same error.
    pub async fn authenticate(&self, username: &str, password: &str) -> ApiResult<AdminUser> {
        let user = self.repo.get_user_by_username(username).await?;
        let Some(user) = user else {
            dummy_verify(password);
            return Err(ApiError::unauthorized("unknown username"));
        };
        if !user.is_active {
            return Err(ApiError::unauthorized("account deactivated"));
        }
        if !verify_password(password, &user.password_hash) {
            return Err(ApiError::unauthorized("wrong password"));
        }
        self.repo.touch_last_login(user.id).await?;
        Ok(user)
    }

    /// Change the password and invalidate every outstanding token.
    pub async fn change_password(
        &self,
        user: &AdminUser,
        current_password: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        if !verify_password(current_password, &user.password_hash) {
            return Err(ApiError::unauthorized("current password is incorrect"));
        }
        if new_password.len() < 12 {
            return Err(ApiError::Validation(
                "password must be at least 12 characters".into(),
            ));
        }
        let hash = hash_password(new_password)?;
        self.repo.change_password(user.id, &hash).await?;
        info!(username = %user.username, "password changed; all tokens invalidated");
        Ok(())
    }

    // === Tokens ===

    fn encode_token(&self, user: &AdminUser, token_type: &str, ttl: Duration) -> ApiResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::from_std(ttl).expect("ttl fits")).timestamp(),
            token_type: token_type.to_string(),
            pv: user.password_version,
            jti: Uuid::new_v4().simple().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::internal(format!("token encoding failed: {e}")))
    }

    pub fn issue_tokens(&self, user: &AdminUser) -> ApiResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.encode_token(user, "access", self.access_ttl)?,
            refresh_token: self.encode_token(user, "refresh", self.refresh_ttl)?,
            token_type: "bearer",
            expires_in: self.access_ttl.as_secs(),
        })
    }

    fn decode_claims(&self, token: &str) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::unauthorized("token expired")
                }
                _ => ApiError::unauthorized(format!("invalid token: {e}")),
            })
    }

    /// Validate an access token end to end: signature, expiry, type,
    /// revocation, and the password-version check against the live user.
    pub async fn validate_access_token(&self, token: &str) -> ApiResult<AdminUser> {
        let claims = self.decode_claims(token)?;
        if claims.token_type != "access" {
            return Err(ApiError::unauthorized("not an access token"));
        }
        if self.is_revoked(&claims.jti).await? {
            return Err(ApiError::unauthorized("token revoked"));
        }
        self.user_for_claims(&claims).await
    }

    pub async fn validate_refresh_token(&self, token: &str) -> ApiResult<AdminUser> {
        let claims = self.decode_claims(token)?;
        if claims.token_type != "refresh" {
            return Err(ApiError::unauthorized("not a refresh token"));
        }
        if self.is_revoked(&claims.jti).await? {
            return Err(ApiError::unauthorized("token revoked"));
        }
        self.user_for_claims(&claims).await
    }

    async fn user_for_claims(&self, claims: &Claims) -> ApiResult<AdminUser> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ApiError::unauthorized("malformed subject"))?;
        let user = self
            .repo
            .get_user(user_id)
            .await
            .map_err(|_| ApiError::unauthorized("user not found"))?;
        if !user.is_active {
            return Err(ApiError::unauthorized("account deactivated"));
        }
        if user.password_version != claims.pv {
            return Err(ApiError::unauthorized("token invalidated by password change"));
        }
        Ok(user)
    }

    // === Revocation ===

    /// Blacklist a token's jti until its natural expiry: DB row plus
    /// in-memory mirror.
    pub async fn revoke(&self, token: &str) -> ApiResult<()> {
        let claims = self.decode_claims(token)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or_else(Utc::now);
        self.repo.blacklist_token(&claims.jti, expires_at).await?;
        self.revoked.lock().insert(claims.jti, expires_at);
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> ApiResult<bool> {
        {
            let mut revoked = self.revoked.lock();
            if let Some(expires_at) = revoked.get(jti) {
                if *expires_at >= Utc::now() {
                    return Ok(true);
                }
                revoked.remove(jti);
            }
        }
        // The mirror is a fast path; the DB stays authoritative
        Ok(self.repo.is_token_blacklisted(jti).await?)
    }

    /// Purge expired rows and mirror entries; run by the cleanup loop.
    pub async fn purge_expired(&self) -> ApiResult<u64> {
        let now = Utc::now();
        self.revoked.lock().retain(|_, expires_at| *expires_at >= now);
        Ok(self.repo.purge_expired_tokens().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbox_storage::db::connect_test;

    async fn service() -> AuthService {
        let repo = AuthRepo::new(connect_test().await);
        AuthService::new(
            repo,
            "test-jwt-secret",
            Duration::from_secs(1800),
            Duration::from_secs(86_400),
        )
    }

    #[tokio::test]
    async fn login_issues_and_validates_tokens() {
        let auth = service().await;
        auth.create_admin("admin", "a-long-password").await.unwrap();

        let user = auth.authenticate("admin", "a-long-password").await.unwrap();
        let tokens = auth.issue_tokens(&user).unwrap();

        let validated = auth.validate_access_token(&tokens.access_token).await.unwrap();
        assert_eq!(validated.username, "admin");

        // Refresh token is not an access token
        assert!(auth.validate_access_token(&tokens.refresh_token).await.is_err());
        assert!(auth.validate_refresh_token(&tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_fail_identically() {
        let auth = service().await;
        auth.create_admin("admin", "a-long-password").await.unwrap();

        let unknown = auth.authenticate("ghost", "whatever").await.unwrap_err();
        let wrong = auth.authenticate("admin", "wrong-password").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn password_change_invalidates_outstanding_tokens() {
        let auth = service().await;
        auth.create_admin("admin", "a-long-password").await.unwrap();
        let user = auth.authenticate("admin", "a-long-password").await.unwrap();
        let tokens = auth.issue_tokens(&user).unwrap();

        auth.change_password(&user, "a-long-password", "a-new-long-password")
            .await
            .unwrap();

        let err = auth.validate_access_token(&tokens.access_token).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn logout_revokes_until_expiry() {
        let auth = service().await;
        auth.create_admin("admin", "a-long-password").await.unwrap();
        let user = auth.authenticate("admin", "a-long-password").await.unwrap();
        let tokens = auth.issue_tokens(&user).unwrap();

        assert!(auth.validate_access_token(&tokens.access_token).await.is_ok());
        auth.revoke(&tokens.access_token).await.unwrap();
        let err = auth.validate_access_token(&tokens.access_token).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn revocation_survives_a_mirror_wipe() {
        let auth = service().await;
        auth.create_admin("admin", "a-long-password").await.unwrap();
        let user = auth.authenticate("admin", "a-long-password").await.unwrap();
        let tokens = auth.issue_tokens(&user).unwrap();
        auth.revoke(&tokens.access_token).await.unwrap();

        // Simulate a restart: mirror empty, DB still authoritative
        auth.revoked.lock().clear();
        assert!(auth.validate_access_token(&tokens.access_token).await.is_err());

        // And reloading the mirror works
        let loaded = auth.load_blacklist().await.unwrap();
        assert_eq!(loaded, 1);
    }

    #[tokio::test]
    async fn second_admin_is_rejected() {
        let auth = service().await;
        auth.create_admin("admin", "a-long-password").await.unwrap();
        assert!(matches!(
            auth.create_admin("admin2", "another-password").await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn login_rate_limit_blocks_sixth_attempt() {
        let auth = service().await;
        for _ in 0..5 {
            auth.check_login_rate("10.0.0.9").unwrap();
        }
        let err = auth.check_login_rate("10.0.0.9").unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { .. }));
        // Other IPs are unaffected
        auth.check_login_rate("10.0.0.10").unwrap();
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let auth = service().await;
        assert!(auth.validate_access_token("not-a-jwt").await.is_err());
    }
}
