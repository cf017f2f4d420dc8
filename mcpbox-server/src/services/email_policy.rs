//! Email policy cache: defence-in-depth allowlist for remote callers
//!
//! The upstream access layer is the primary enforcement point; this cache
//! is the gateway-level second check, so an upstream misconfiguration
//! ("allow everyone") does not silently widen access. The policy lives in
//! the settings table and is re-read every 30 seconds.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use mcpbox_core::setting::keys;
use mcpbox_storage::SettingRepo;

/// Policy refresh cadence.
const TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
enum Policy {
    Everyone,
    Emails(Vec<String>),
    EmailDomain(String),
}

#[derive(Default)]
struct CacheState {
    policy: Option<Policy>,
    /// Set when the DB was unreachable on first load: fail closed.
    db_error: bool,
    last_loaded: Option<Instant>,
}

pub struct EmailPolicyCache {
    repo: SettingRepo,
    state: RwLock<CacheState>,
}

impl EmailPolicyCache {
    pub fn new(repo: SettingRepo) -> Self {
        Self {
            repo,
            state: RwLock::new(CacheState::default()),
        }
    }

    async fn load(&self) {
        let policy_type = match self.repo.get(keys::ACCESS_POLICY_TYPE).await {
            Ok(setting) => setting.and_then(|s| s.value),
            Err(e) => {
                let mut state = self.state.write();
                if state.policy.is_some() {
                    warn!(error = %e, "database unreachable, retaining last known email policy");
                } else {
                    warn!(
                        error = %e,
                        "database unreachable on first email policy load, failing closed"
                    );
                    state.db_error = true;
                }
                // last_loaded untouched, so the next access retries
                return;
            }
        };

        let policy = match policy_type.as_deref() {
            None => None,
            Some("everyone") => Some(Policy::Everyone),
            Some("emails") => {
                let raw = self
                    .repo
                    .get(keys::ACCESS_POLICY_EMAILS)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|s| s.value)
                    .unwrap_or_default();
                match serde_json::from_str::<Vec<String>>(&raw) {
                    Ok(emails) => Some(Policy::Emails(
                        emails.iter().map(|e| e.to_lowercase()).collect(),
                    )),
                    Err(_) => {
                        warn!("failed to parse access policy emails, failing closed");
                        Some(Policy::Emails(Vec::new()))
                    }
                }
            }
            Some("email_domain") => {
                let domain = self
                    .repo
                    .get(keys::ACCESS_POLICY_EMAIL_DOMAIN)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|s| s.value)
                    .unwrap_or_default()
                    .to_lowercase();
                Some(Policy::EmailDomain(domain))
            }
            Some(other) => {
                warn!(policy = other, "unknown access policy type, failing closed");
                Some(Policy::Emails(Vec::new()))
            }
        };

        let mut state = self.state.write();
        match &policy {
            Some(p) => info!(policy = ?p, "email policy cache loaded"),
            None => debug!("email policy cache: no policy configured"),
        }
        state.policy = policy;
        state.db_error = false;
        state.last_loaded = Some(Instant::now());
    }

    async fn refresh_if_stale(&self) {
        let stale = {
            let state = self.state.read();
            match state.last_loaded {
                Some(loaded) => loaded.elapsed() >= TTL,
                None => true,
            }
        };
        if stale {
            self.load().await;
        }
    }

    /// Drop the cached policy so the next check reloads; called by the
    /// settings write path.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        *state = CacheState::default();
    }

    /// Check whether `email` may pass the gateway. Returns the denial
    /// reason for logging; it is never echoed to the caller.
    pub async fn check_email(&self, email: Option<&str>) -> (bool, String) {
        self.refresh_if_stale().await;
        let state = self.state.read();

        if state.db_error {
            return (
                false,
                "email policy unavailable (database unreachable)".to_string(),
            );
        }
        let Some(policy) = &state.policy else {
            // No policy configured: nothing to enforce
            return (true, String::new());
        };
        if *policy == Policy::Everyone {
            return (true, String::new());
        }
        let Some(email) = email else {
            return (
                false,
                "email required by access policy but not provided".to_string(),
            );
        };
        let normalised = email.to_lowercase();

        match policy {
            Policy::Emails(allowed) => {
                if allowed.contains(&normalised) {
                    (true, String::new())
                } else {
                    (
                        false,
                        format!(
                            "email {email} not in gateway allowlist ({} allowed)",
                            allowed.len()
                        ),
                    )
                }
            }
            Policy::EmailDomain(domain) => {
                if !domain.is_empty() && normalised.ends_with(&format!("@{domain}")) {
                    (true, String::new())
                } else {
                    (
                        false,
                        format!("email domain of {email} does not match allowed domain {domain}"),
                    )
                }
            }
            Policy::Everyone => (true, String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbox_storage::db::connect_test;

    async fn cache_with(policy: &[(&str, &str)]) -> EmailPolicyCache {
        let repo = SettingRepo::new(connect_test().await);
        for (key, value) in policy {
            repo.set(key, Some(value), false).await.unwrap();
        }
        EmailPolicyCache::new(repo)
    }

    #[tokio::test]
    async fn no_policy_allows_everything() {
        let cache = cache_with(&[]).await;
        let (allowed, _) = cache.check_email(Some("anyone@example.com")).await;
        assert!(allowed);
        let (allowed, _) = cache.check_email(None).await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn everyone_policy_allows_authenticated_users() {
        let cache = cache_with(&[(keys::ACCESS_POLICY_TYPE, "everyone")]).await;
        let (allowed, _) = cache.check_email(Some("x@y.z")).await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn email_list_policy_is_case_insensitive() {
        let cache = cache_with(&[
            (keys::ACCESS_POLICY_TYPE, "emails"),
            (keys::ACCESS_POLICY_EMAILS, r#"["Admin@Example.com"]"#),
        ])
        .await;
        let (allowed, _) = cache.check_email(Some("admin@example.COM")).await;
        assert!(allowed);
        let (denied, reason) = cache.check_email(Some("other@example.com")).await;
        assert!(!denied);
        assert!(reason.contains("not in gateway allowlist"));
    }

    #[tokio::test]
    async fn domain_policy_matches_suffix_strictly() {
        let cache = cache_with(&[
            (keys::ACCESS_POLICY_TYPE, "email_domain"),
            (keys::ACCESS_POLICY_EMAIL_DOMAIN, "example.com"),
        ])
        .await;
        let (allowed, _) = cache.check_email(Some("a@example.com")).await;
        assert!(allowed);
        let (denied, _) = cache.check_email(Some("a@notexample.com")).await;
        assert!(!denied);
        let (denied, _) = cache.check_email(None).await;
        assert!(!denied);
    }

    #[tokio::test]
    async fn unknown_policy_fails_closed() {
        let cache = cache_with(&[(keys::ACCESS_POLICY_TYPE, "wildcard")]).await;
        let (allowed, _) = cache.check_email(Some("a@example.com")).await;
        assert!(!allowed);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let db = connect_test().await;
        let repo = SettingRepo::new(db.clone());
        let cache = EmailPolicyCache::new(SettingRepo::new(db));
        let (allowed, _) = cache.check_email(Some("x@y.z")).await;
        assert!(allowed);

        repo.set(keys::ACCESS_POLICY_TYPE, Some("emails"), false)
            .await
            .unwrap();
        repo.set(keys::ACCESS_POLICY_EMAILS, Some(r#"["a@b.c"]"#), false)
            .await
            .unwrap();

        // Within the TTL the stale policy would still apply; invalidation
        // forces the reload immediately.
        cache.invalidate();
        let (allowed, _) = cache.check_email(Some("x@y.z")).await;
        assert!(!allowed);
    }
}
