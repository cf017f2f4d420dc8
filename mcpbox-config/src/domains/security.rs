//! Security configuration: keys, shared secrets, trusted proxies

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::EnvLookup;
use crate::validation::{validate_min_length, Validatable};

/// Minimum length for the sandbox shared secret.
pub const SANDBOX_API_KEY_MIN_LEN: usize = 32;

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// 64 hex chars (32 bytes); encrypts every secret at rest.
    #[serde(skip_serializing)]
    pub encryption_key_hex: String,

    /// Shared secret for the loopback sandbox channel (≥ 32 chars).
    #[serde(skip_serializing)]
    pub sandbox_api_key: String,

    /// JWT signing secret; must differ from the other two.
    #[serde(skip_serializing)]
    pub jwt_secret_key: String,

    /// Peers allowed to set X-Forwarded-For. Empty ⇒ the header is never
    /// trusted.
    pub trusted_proxy_ips: Vec<String>,

    /// Whether the process runs under CI (`CI=true`); downgrades the
    /// all-zero-key rejection to a warning.
    pub ci: bool,
}

impl SecurityConfig {
    pub fn from_env(env: &impl EnvLookup) -> ConfigResult<Self> {
        let encryption_key_hex = env
            .get("MCPBOX_ENCRYPTION_KEY")
            .ok_or(ConfigError::MissingEnv("MCPBOX_ENCRYPTION_KEY"))?;
        let sandbox_api_key = env
            .get("SANDBOX_API_KEY")
            .ok_or(ConfigError::MissingEnv("SANDBOX_API_KEY"))?;
        let jwt_secret_key = env
            .get("JWT_SECRET_KEY")
            .ok_or(ConfigError::MissingEnv("JWT_SECRET_KEY"))?;

        let trusted_proxy_ips = env
            .get("TRUSTED_PROXY_IPS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            encryption_key_hex,
            sandbox_api_key,
            jwt_secret_key,
            trusted_proxy_ips,
            ci: env.get("CI").as_deref() == Some("true"),
        })
    }
}

impl Validatable for SecurityConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.encryption_key_hex.len() != 64
            || !self.encryption_key_hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ConfigError::DomainError {
                domain: "security",
                message: "MCPBOX_ENCRYPTION_KEY must be 64 hex characters (32 bytes)".to_string(),
            });
        }

        validate_min_length(&self.sandbox_api_key, SANDBOX_API_KEY_MIN_LEN, "SANDBOX_API_KEY")?;

        if self.jwt_secret_key.is_empty() {
            return Err(ConfigError::DomainError {
                domain: "security",
                message: "JWT_SECRET_KEY must not be empty".to_string(),
            });
        }

        // Reusing one secret for two purposes widens the blast radius of a
        // leak; warn but keep serving.
        if self.jwt_secret_key == self.encryption_key_hex
            || self.jwt_secret_key == self.sandbox_api_key
        {
            warn!("JWT_SECRET_KEY duplicates another configured secret");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid_env() -> HashMap<String, String> {
        env(&[
            ("MCPBOX_ENCRYPTION_KEY", &"ab".repeat(32)),
            ("SANDBOX_API_KEY", &"k".repeat(40)),
            ("JWT_SECRET_KEY", "another-secret-entirely"),
        ])
    }

    #[test]
    fn loads_and_validates() {
        let config = SecurityConfig::from_env(&valid_env()).unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.ci);
        assert!(config.trusted_proxy_ips.is_empty());
    }

    #[test]
    fn missing_key_is_an_error() {
        let mut e = valid_env();
        e.remove("MCPBOX_ENCRYPTION_KEY");
        assert!(matches!(
            SecurityConfig::from_env(&e),
            Err(ConfigError::MissingEnv("MCPBOX_ENCRYPTION_KEY"))
        ));
    }

    #[test]
    fn short_sandbox_key_fails_validation() {
        let mut e = valid_env();
        e.insert("SANDBOX_API_KEY".into(), "too-short".into());
        let config = SecurityConfig::from_env(&e).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_hex_key_fails_validation() {
        let mut e = valid_env();
        e.insert("MCPBOX_ENCRYPTION_KEY".into(), "zz".repeat(32));
        assert!(SecurityConfig::from_env(&e).unwrap().validate().is_err());
    }

    #[test]
    fn trusted_proxies_are_parsed() {
        let mut e = valid_env();
        e.insert("TRUSTED_PROXY_IPS".into(), "10.0.0.1, 10.0.0.2 ,".into());
        let config = SecurityConfig::from_env(&e).unwrap();
        assert_eq!(config.trusted_proxy_ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn ci_flag_requires_exact_true() {
        let mut e = valid_env();
        e.insert("CI".into(), "1".into());
        assert!(!SecurityConfig::from_env(&e).unwrap().ci);
        e.insert("CI".into(), "true".into());
        assert!(SecurityConfig::from_env(&e).unwrap().ci);
    }
}
