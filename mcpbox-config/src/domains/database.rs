//! Database configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::loader::EnvLookup;
use crate::validation::{validate_required_string, Validatable};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL; SQLite by default.
    pub url: String,

    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mcpbox.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env(env: &impl EnvLookup) -> Self {
        let mut config = Self::default();
        if let Some(url) = env.get("DATABASE_URL") {
            config.url = url;
        }
        config
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }
}

impl Validatable for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.url, "database url")
    }
}
