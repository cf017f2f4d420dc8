//! Domain-specific configuration modules

pub mod database;
pub mod gateway;
pub mod rate_limit;
pub mod sandbox;
pub mod security;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::loader::EnvLookup;
use crate::validation::Validatable;

/// Aggregated configuration for an MCPbox process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct McpboxConfig {
    pub database: database::DatabaseConfig,
    pub gateway: gateway::GatewayConfig,
    pub rate_limit: rate_limit::RateLimitConfig,
    pub sandbox: sandbox::SandboxConfig,
    pub security: security::SecurityConfig,
}

impl McpboxConfig {
    /// Load every domain from the environment and validate the result.
    pub fn from_env(env: &impl EnvLookup) -> ConfigResult<Self> {
        let config = Self {
            database: database::DatabaseConfig::from_env(env),
            gateway: gateway::GatewayConfig::from_env(env),
            rate_limit: rate_limit::RateLimitConfig::default(),
            sandbox: sandbox::SandboxConfig::from_env(env)?,
            security: security::SecurityConfig::from_env(env)?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Validatable for McpboxConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.gateway.validate()?;
        self.rate_limit.validate()?;
        self.sandbox.validate()?;
        self.security.validate()?;
        Ok(())
    }
}
