//! Configuration error types

use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A mandatory environment variable is absent.
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    ValidationError(String),

    /// Domain-specific configuration error.
    #[error("configuration error in {domain}: {message}")]
    DomainError { domain: &'static str, message: String },
}
