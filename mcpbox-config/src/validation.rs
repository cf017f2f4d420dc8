//! Validation helpers shared by the configuration domains

use crate::error::{ConfigError, ConfigResult};

/// Implemented by every domain config; the loader runs validation once at
/// startup, before anything is served.
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;
}

/// Require a positive value.
pub fn validate_positive(value: u64, field: &str) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(())
}

/// Require a non-empty string.
pub fn validate_required_string(value: &str, field: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

/// Require a minimum string length, for shared secrets.
pub fn validate_min_length(value: &str, min: usize, field: &str) -> ConfigResult<()> {
    if value.len() < min {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be at least {min} characters, got {}",
            value.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_rejects_zero() {
        assert!(validate_positive(0, "limit").is_err());
        assert!(validate_positive(1, "limit").is_ok());
    }

    #[test]
    fn required_string_rejects_blank() {
        assert!(validate_required_string("  ", "name").is_err());
        assert!(validate_required_string("x", "name").is_ok());
    }

    #[test]
    fn min_length_counts_bytes() {
        assert!(validate_min_length("short", 32, "api key").is_err());
        assert!(validate_min_length(&"a".repeat(32), 32, "api key").is_ok());
    }
}
