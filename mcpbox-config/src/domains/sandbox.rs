//! Sandbox runtime configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::EnvLookup;
use crate::validation::{validate_positive, Validatable};

/// Sandbox runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Bind address of the loopback sandbox service.
    pub bind_addr: String,

    /// Captured stdout/result cap per execution.
    pub max_output_size: usize,

    /// Virtual address space limit for the sandbox process.
    pub max_memory_bytes: u64,

    /// File descriptor cap for the sandbox process.
    pub max_file_descriptors: u64,

    /// Cumulative CPU-seconds safety net (per-call limits come from tool
    /// timeouts).
    pub cpu_limit_seconds: u64,

    /// Refuse to serve when a critical RLIMIT could not be set.
    pub require_resource_limits: bool,

    /// Default per-call timeout when neither tool nor server sets one.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8100".to_string(),
            max_output_size: 1024 * 1024,
            max_memory_bytes: 256 * 1024 * 1024,
            max_file_descriptors: 256,
            cpu_limit_seconds: 3600,
            require_resource_limits: true,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl SandboxConfig {
    pub fn from_env(env: &impl EnvLookup) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(addr) = env.get("SANDBOX_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(value) = env.get("SANDBOX_MAX_OUTPUT_SIZE") {
            config.max_output_size = parse_env("SANDBOX_MAX_OUTPUT_SIZE", &value)?;
        }
        if let Some(value) = env.get("SANDBOX_MAX_MEMORY_BYTES") {
            config.max_memory_bytes = parse_env("SANDBOX_MAX_MEMORY_BYTES", &value)?;
        }
        if let Some(value) = env.get("REQUIRE_RESOURCE_LIMITS") {
            config.require_resource_limits = value.to_lowercase() != "false";
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> ConfigResult<T> {
    value.parse().map_err(|_| ConfigError::DomainError {
        domain: "sandbox",
        message: format!("{name} must be a number, got '{value}'"),
    })
}

impl Validatable for SandboxConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_output_size as u64, "max_output_size")?;
        validate_positive(self.max_memory_bytes, "max_memory_bytes")?;
        validate_positive(self.max_file_descriptors, "max_file_descriptors")?;
        validate_positive(self.default_timeout.as_millis() as u64, "default_timeout")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_spec() {
        let config = SandboxConfig::default();
        assert_eq!(config.max_output_size, 1024 * 1024);
        assert_eq!(config.max_memory_bytes, 256 * 1024 * 1024);
        assert_eq!(config.max_file_descriptors, 256);
        assert_eq!(config.cpu_limit_seconds, 3600);
        assert!(config.require_resource_limits);
    }

    #[test]
    fn env_overrides_are_applied() {
        let mut env = HashMap::new();
        env.insert("SANDBOX_MAX_OUTPUT_SIZE".to_string(), "2048".to_string());
        env.insert("REQUIRE_RESOURCE_LIMITS".to_string(), "false".to_string());

        let config = SandboxConfig::from_env(&env).unwrap();
        assert_eq!(config.max_output_size, 2048);
        assert!(!config.require_resource_limits);
    }

    #[test]
    fn junk_numbers_are_rejected() {
        let mut env = HashMap::new();
        env.insert("SANDBOX_MAX_MEMORY_BYTES".to_string(), "lots".to_string());
        assert!(SandboxConfig::from_env(&env).is_err());
    }
}
