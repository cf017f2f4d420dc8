//! Request rate limiting
//!
//! Per `(client IP, path prefix)` bucket with three concurrent limits: a
//! token bucket for burst control, and sliding windows over the trailing
//! minute and hour. `X-Forwarded-For` is honoured only when the direct
//! peer is a configured trusted proxy. Idle buckets are garbage-collected
//! by the cleanup loop.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use axum::http::HeaderMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use mcpbox_config::RateLimitConfig;

#[cfg(test)]
use mcpbox_config::domains::rate_limit::PathLimits;

/// Outcome of a rate-limit check, with the headers to attach.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
    pub headers: Vec<(&'static str, String)>,
}

struct Bucket {
    tokens: f64,
    last_update: Instant,
    minute_requests: Vec<Instant>,
    hour_requests: Vec<Instant>,
}

impl Bucket {
    fn new(burst: u32) -> Self {
        Self {
            tokens: burst as f64,
            last_update: Instant::now(),
            minute_requests: Vec::new(),
            hour_requests: Vec::new(),
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    trusted_proxies: Vec<String>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, trusted_proxies: Vec<String>) -> Self {
        Self {
            config,
            trusted_proxies,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the client IP. The forwarded header is spoofable, so it
    /// only counts when the direct peer is a trusted proxy.
    pub fn client_ip(&self, direct_ip: &str, headers: &HeaderMap) -> String {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim);

        if let Some(forwarded) = forwarded {
            if self.trusted_proxies.iter().any(|p| p == direct_ip) {
                if forwarded.parse::<IpAddr>().is_ok() {
                    return forwarded.to_string();
                }
                warn!(forwarded, "invalid IP in X-Forwarded-For header");
            } else if self.trusted_proxies.is_empty() {
                debug!("X-Forwarded-For ignored: no trusted proxies configured");
            } else {
                debug!(peer = direct_ip, "X-Forwarded-For ignored: peer not a trusted proxy");
            }
        }
        direct_ip.to_string()
    }

    /// Check one request against the bucket for `(ip, prefix)`.
    pub fn check(&self, client_ip: &str, path: &str) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision {
                allowed: true,
                retry_after_secs: 0,
                headers: Vec::new(),
            };
        }

        let (prefix, limits) = self.config.limits_for_path(path);
        let bucket_key = format!("{client_ip}:{prefix}");
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(bucket_key)
            .or_insert_with(|| Bucket::new(limits.burst_size));

        // Expire old timestamps out of both windows
        bucket
            .minute_requests
            .retain(|t| now.duration_since(*t).as_secs_f64() < 60.0);
        bucket
            .hour_requests
            .retain(|t| now.duration_since(*t).as_secs_f64() < 3600.0);

        let minute_remaining =
            limits.requests_per_minute as i64 - bucket.minute_requests.len() as i64;
        let hour_remaining = limits.requests_per_hour as i64 - bucket.hour_requests.len() as i64;

        let mut headers = vec![
            ("X-RateLimit-Limit", limits.requests_per_minute.to_string()),
            (
                "X-RateLimit-Remaining",
                (minute_remaining - 1).max(0).to_string(),
            ),
            ("X-RateLimit-Limit-Hour", limits.requests_per_hour.to_string()),
            (
                "X-RateLimit-Remaining-Hour",
                (hour_remaining - 1).max(0).to_string(),
            ),
        ];

        // Sliding minute window
        if minute_remaining <= 0 {
            let oldest = bucket.minute_requests.iter().min().copied().unwrap_or(now);
            let retry = (60.0 - now.duration_since(oldest).as_secs_f64()).ceil() as u64;
            let retry = retry.max(1);
            headers.push(("Retry-After", retry.to_string()));
            return RateLimitDecision {
                allowed: false,
                retry_after_secs: retry,
                headers,
            };
        }

        // Sliding hour window
        if hour_remaining <= 0 {
            let oldest = bucket.hour_requests.iter().min().copied().unwrap_or(now);
            let retry = (3600.0 - now.duration_since(oldest).as_secs_f64()).ceil() as u64;
            let retry = retry.max(1);
            headers.push(("Retry-After", retry.to_string()));
            return RateLimitDecision {
                allowed: false,
                retry_after_secs: retry,
                headers,
            };
        }

        // Token bucket for burst control
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        let refill_rate = limits.requests_per_minute as f64 / 60.0;
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(limits.burst_size as f64);
        bucket.last_update = now;

        if bucket.tokens < 1.0 {
            headers.push(("Retry-After", "1".to_string()));
            return RateLimitDecision {
                allowed: false,
                retry_after_secs: 1,
                headers,
            };
        }

        bucket.tokens -= 1.0;
        bucket.minute_requests.push(now);
        bucket.hour_requests.push(now);

        RateLimitDecision {
            allowed: true,
            retry_after_secs: 0,
            headers,
        }
    }

    /// Drop buckets idle for longer than the configured horizon. Run by
    /// the cleanup loop; returns how many were removed.
    pub fn cleanup_idle(&self) -> usize {
        let horizon = self.config.bucket_idle_seconds;
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_update).as_secs() < horizon
                || !bucket.hour_requests.is_empty()
        });
        let removed = before - buckets.len();
        if removed > 0 {
            info!(removed, "cleaned up idle rate-limit buckets");
        }
        removed
    }

    /// Current bucket statistics for the ops endpoint.
    pub fn stats(&self) -> Vec<(String, usize, usize, f64)> {
        let buckets = self.buckets.lock();
        let mut out: Vec<_> = buckets
            .iter()
            .map(|(key, bucket)| {
                (
                    key.clone(),
                    bucket.minute_requests.len(),
                    bucket.hour_requests.len(),
                    bucket.tokens,
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[cfg(test)]
    fn limits_for(&self, path: &str) -> PathLimits {
        self.config.limits_for_path(path).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default(), vec!["10.0.0.1".to_string()])
    }

    fn tiny_limiter(rpm: u32, rph: u32, burst: u32) -> RateLimiter {
        let mut config = RateLimitConfig::default();
        config.prefixes = vec![(
            "/mcp".to_string(),
            PathLimits {
                requests_per_minute: rpm,
                requests_per_hour: rph,
                burst_size: burst,
            },
        )];
        RateLimiter::new(config, Vec::new())
    }

    #[test]
    fn allows_up_to_rpm_then_denies_with_retry_after() {
        let limiter = tiny_limiter(10, 1000, 10);
        for i in 0..10 {
            let decision = limiter.check("1.2.3.4", "/mcp");
            assert!(decision.allowed, "request {i} should pass");
            let remaining: u64 = decision
                .headers
                .iter()
                .find(|(k, _)| *k == "X-RateLimit-Remaining")
                .unwrap()
                .1
                .parse()
                .unwrap();
            assert_eq!(remaining, (9 - i) as u64);
        }

        let denied = limiter.check("1.2.3.4", "/mcp");
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs >= 1 && denied.retry_after_secs <= 60);
        assert!(denied.headers.iter().any(|(k, _)| *k == "Retry-After"));
    }

    #[test]
    fn burst_is_limited_below_rpm() {
        let limiter = tiny_limiter(60, 1000, 3);
        assert!(limiter.check("1.2.3.4", "/mcp").allowed);
        assert!(limiter.check("1.2.3.4", "/mcp").allowed);
        assert!(limiter.check("1.2.3.4", "/mcp").allowed);
        // Fourth immediate request exhausts the burst tokens
        let denied = limiter.check("1.2.3.4", "/mcp");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 1);
    }

    #[test]
    fn buckets_are_isolated_per_ip_and_prefix() {
        let limiter = tiny_limiter(1, 1000, 1);
        assert!(limiter.check("1.1.1.1", "/mcp").allowed);
        assert!(!limiter.check("1.1.1.1", "/mcp").allowed);
        // Another IP is unaffected
        assert!(limiter.check("2.2.2.2", "/mcp").allowed);
        // Another prefix is unaffected (default limits)
        assert!(limiter.check("1.1.1.1", "/api/other").allowed);
    }

    #[test]
    fn forwarded_header_needs_a_trusted_peer() {
        let limiter = limiter();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        // Trusted peer: forwarded IP wins
        assert_eq!(limiter.client_ip("10.0.0.1", &headers), "203.0.113.9");
        // Untrusted peer: header ignored
        assert_eq!(limiter.client_ip("198.51.100.7", &headers), "198.51.100.7");

        // Garbage forwarded value falls back to the peer
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(limiter.client_ip("10.0.0.1", &headers), "10.0.0.1");
    }

    #[test]
    fn no_trusted_proxies_never_trusts_the_header() {
        let limiter = RateLimiter::new(RateLimitConfig::default(), Vec::new());
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(limiter.client_ip("10.0.0.1", &headers), "10.0.0.1");
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut config = RateLimitConfig::default();
        config.enabled = false;
        let limiter = RateLimiter::new(config, Vec::new());
        for _ in 0..1000 {
            assert!(limiter.check("1.1.1.1", "/mcp").allowed);
        }
    }

    #[test]
    fn cleanup_drops_idle_buckets_only() {
        let mut config = RateLimitConfig::default();
        config.bucket_idle_seconds = 0;
        let limiter = RateLimiter::new(config, Vec::new());
        limiter.check("1.1.1.1", "/mcp");
        // The bucket has a recent request in the hour window, so it stays
        assert_eq!(limiter.cleanup_idle(), 0);
        assert_eq!(limiter.stats().len(), 1);
    }

    #[test]
    fn prefix_resolution_matches_config() {
        let limiter = limiter();
        assert_eq!(limiter.limits_for("/mcp").requests_per_minute, 60);
        assert_eq!(limiter.limits_for("/health").requests_per_minute, 30);
        assert_eq!(limiter.limits_for("/api/servers").requests_per_minute, 100);
    }
}
