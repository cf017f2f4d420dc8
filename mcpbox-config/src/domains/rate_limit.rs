//! Rate-limit configuration: per-path-prefix limits

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Limits for one path prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PathLimits {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub burst_size: u32,
}

/// Rate-limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Prefix-ordered limit table; first matching prefix wins.
    pub prefixes: Vec<(String, PathLimits)>,

    /// Limits for paths matching no prefix.
    pub default_limits: PathLimits,

    /// Seconds of inactivity after which a bucket is garbage-collected.
    pub bucket_idle_seconds: u64,

    /// Master switch; disabled only in tests.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            prefixes: vec![
                (
                    "/health".to_string(),
                    PathLimits {
                        requests_per_minute: 30,
                        requests_per_hour: 600,
                        burst_size: 10,
                    },
                ),
                (
                    "/api/tools/".to_string(),
                    PathLimits {
                        requests_per_minute: 60,
                        requests_per_hour: 1000,
                        burst_size: 15,
                    },
                ),
                (
                    "/mcp".to_string(),
                    PathLimits {
                        requests_per_minute: 60,
                        requests_per_hour: 1000,
                        burst_size: 15,
                    },
                ),
            ],
            default_limits: PathLimits {
                requests_per_minute: 100,
                requests_per_hour: 2000,
                burst_size: 20,
            },
            bucket_idle_seconds: 24 * 3600,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Limits and matched prefix for a request path.
    pub fn limits_for_path<'a>(&'a self, path: &str) -> (&'a str, PathLimits) {
        for (prefix, limits) in &self.prefixes {
            if path.starts_with(prefix.as_str()) {
                return (prefix, *limits);
            }
        }
        ("default", self.default_limits)
    }
}

impl Validatable for RateLimitConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (prefix, limits) in self
            .prefixes
            .iter()
            .map(|(p, l)| (p.as_str(), l))
            .chain(std::iter::once(("default", &self.default_limits)))
        {
            validate_positive(limits.requests_per_minute as u64, prefix)?;
            validate_positive(limits.requests_per_hour as u64, prefix)?;
            validate_positive(limits.burst_size as u64, prefix)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_prefix_wins() {
        let config = RateLimitConfig::default();
        let (prefix, limits) = config.limits_for_path("/mcp");
        assert_eq!(prefix, "/mcp");
        assert_eq!(limits.requests_per_minute, 60);

        let (prefix, _) = config.limits_for_path("/health/live");
        assert_eq!(prefix, "/health");

        let (prefix, limits) = config.limits_for_path("/api/servers");
        assert_eq!(prefix, "default");
        assert_eq!(limits.requests_per_minute, 100);
    }
}
