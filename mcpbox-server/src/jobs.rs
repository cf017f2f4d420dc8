//! Background maintenance loops
//!
//! One cleanup loop carries the retention eviction, blacklist purge,
//! rate-limit bucket GC and pending-OAuth-flow sweep; the token refresh
//! service runs on its own cadence.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use mcpbox_core::setting::keys;

use crate::services::token_refresh::TokenRefreshService;
use crate::state::AppState;

/// Spawn every background loop. Called once at startup.
pub fn spawn_all(state: Arc<AppState>) {
    tokio::spawn(cleanup_loop(state.clone()));

    let refresh = TokenRefreshService::new(state.credentials.clone(), state.oauth.clone());
    tokio::spawn(refresh.run());
}

async fn cleanup_loop(state: Arc<AppState>) {
    let interval = state.config.gateway.cleanup_interval;
    loop {
        tokio::time::sleep(interval).await;
        run_cleanup_once(&state).await;
    }
}

/// One cleanup pass; factored out so tests can drive it directly.
pub async fn run_cleanup_once(state: &Arc<AppState>) {
    // Activity/execution retention, honouring the DB setting
    let retention_days = match state
        .settings
        .get_value_or(
            keys::LOG_RETENTION_DAYS,
            &state.config.gateway.log_retention_days.to_string(),
        )
        .await
    {
        Ok(raw) => raw
            .parse::<i64>()
            .unwrap_or(state.config.gateway.log_retention_days as i64),
        Err(e) => {
            warn!(error = %e, "could not read log retention setting");
            state.config.gateway.log_retention_days as i64
        }
    };
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    match state.logs.repo().delete_older_than(cutoff).await {
        Ok((activity, executions)) if activity + executions > 0 => {
            info!(activity, executions, retention_days, "evicted expired audit rows");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "log retention eviction failed"),
    }

    // Expired JWT blacklist rows
    match state.auth.purge_expired().await {
        Ok(purged) if purged > 0 => info!(purged, "purged expired blacklist entries"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "blacklist purge failed"),
    }

    // Idle rate-limit buckets
    state.rate_limiter.cleanup_idle();

    // Abandoned OAuth flows
    let swept = state.oauth.sweep_pending();
    if swept > 0 {
        info!(swept, "swept expired pending OAuth flows");
    }
}
