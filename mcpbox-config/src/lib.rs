//! Domain-driven configuration management for MCPbox
//!
//! Configuration is split by functional domain, loaded from the process
//! environment, and validated before the first request is served. The
//! management plane and the sandbox each load the subset they need.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use domains::{
    database::DatabaseConfig, gateway::GatewayConfig, rate_limit::RateLimitConfig,
    sandbox::SandboxConfig, security::SecurityConfig, McpboxConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{env_lookup, EnvLookup};
pub use validation::Validatable;
