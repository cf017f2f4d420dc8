//! Background OAuth token refresh loop
//!
//! Every five minutes, credentials whose access token expires within the
//! next ten minutes (and which hold a refresh token) are refreshed one by
//! one; each success is committed independently so a later failure cannot
//! lose earlier progress. After five consecutive loop failures a critical
//! warning is logged and the counter resets; the loop never gives up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::services::credentials::CredentialService;
use crate::services::oauth::OAuthService;

/// Cadence of the refresh sweep.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Tokens expiring within this window are refreshed.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(600);

const MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub struct TokenRefreshService {
    credentials: CredentialService,
    oauth: Arc<OAuthService>,
}

impl TokenRefreshService {
    pub fn new(credentials: CredentialService, oauth: Arc<OAuthService>) -> Self {
        Self { credentials, oauth }
    }

    /// Run forever; spawned as a background task.
    pub async fn run(self) {
        let mut consecutive_failures: u32 = 0;
        loop {
            match self.refresh_expiring().await {
                Ok(_) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        failure = consecutive_failures,
                        max = MAX_CONSECUTIVE_FAILURES,
                        error = %e,
                        "token refresh sweep failed"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        error!(
                            "token refresh has failed {consecutive_failures} times consecutively; \
                             OAuth tokens may expire without being refreshed"
                        );
                        consecutive_failures = 0;
                    }
                }
            }
            tokio::time::sleep(CHECK_INTERVAL).await;
        }
    }

    /// One sweep: find and refresh everything expiring soon. Returns
    /// (refreshed, failed).
    pub async fn refresh_expiring(&self) -> Result<(usize, usize), crate::error::ApiError> {
        let threshold = Utc::now() + chrono::Duration::from_std(EXPIRY_BUFFER).expect("fits");
        let expiring = self.credentials.repo().list_expiring(threshold).await?;
        if expiring.is_empty() {
            return Ok((0, 0));
        }
        info!(count = expiring.len(), "found OAuth tokens to refresh");

        let mut refreshed = 0;
        let mut failed = 0;
        for credential in expiring {
            // Each refresh commits on its own, so earlier successes stick
            match self.oauth.refresh_token(&credential).await {
                Ok(_) => {
                    refreshed += 1;
                    info!(credential = %credential.name, "refreshed OAuth token");
                }
                Err(e) => {
                    failed += 1;
                    warn!(credential = %credential.name, error = %e, "failed to refresh OAuth token");
                }
            }
        }
        if refreshed > 0 || failed > 0 {
            info!(refreshed, failed, "token refresh sweep complete");
        }
        Ok((refreshed, failed))
    }
}
