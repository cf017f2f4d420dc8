//! Shared error taxonomy for the MCPbox domain

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by domain-level validation and parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A string did not match any variant of a domain enum.
    #[error("invalid {kind}: '{value}'")]
    InvalidEnumValue { kind: &'static str, value: String },

    /// A tool name violated the `^[a-z][a-z0-9_]*$` rule.
    #[error("invalid tool name '{0}': must start with a lowercase letter and contain only lowercase letters, digits and underscores")]
    InvalidToolName(String),

    /// A field failed a length or format constraint.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
