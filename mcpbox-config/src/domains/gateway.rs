//! Management-plane and gateway configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::loader::EnvLookup;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Management-plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address of the management API and `/mcp` endpoint.
    pub bind_addr: String,

    /// Base URL of the loopback sandbox service.
    pub sandbox_url: String,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Cadence of the cleanup loops (retention, blacklist purge,
    /// rate-limit GC).
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Fallback activity-log retention when the DB setting is absent.
    pub log_retention_days: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            sandbox_url: "http://127.0.0.1:8100".to_string(),
            access_token_ttl: Duration::from_secs(30 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            log_retention_days: 30,
        }
    }
}

impl GatewayConfig {
    pub fn from_env(env: &impl EnvLookup) -> Self {
        let mut config = Self::default();
        if let Some(addr) = env.get("MCPBOX_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(url) = env.get("SANDBOX_URL") {
            config.sandbox_url = url;
        }
        if let Some(value) = env.get("CLEANUP_INTERVAL_SECONDS") {
            if let Ok(secs) = value.parse::<u64>() {
                config.cleanup_interval = Duration::from_secs(secs);
            }
        }
        config
    }
}

impl Validatable for GatewayConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.bind_addr, "bind_addr")?;
        validate_required_string(&self.sandbox_url, "sandbox_url")?;
        validate_positive(self.access_token_ttl.as_secs(), "access_token_ttl")?;
        validate_positive(self.refresh_token_ttl.as_secs(), "refresh_token_ttl")?;
        validate_positive(self.cleanup_interval.as_secs(), "cleanup_interval")?;
        validate_positive(self.log_retention_days as u64, "log_retention_days")?;
        Ok(())
    }
}
