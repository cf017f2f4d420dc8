//! HTTP middleware for the management plane

pub mod auth;
pub mod rate_limit;

pub use auth::{require_admin, AuthContext};
pub use rate_limit::{RateLimiter, RateLimitDecision};
