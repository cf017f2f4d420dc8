//! Shared application state
//!
//! Every long-lived service and cache lives here, constructed once before
//! the first request is served and passed through the request context as
//! an `Arc<AppState>`.

use std::sync::Arc;

use mcpbox_config::McpboxConfig;
use mcpbox_crypto::EncryptionKey;
use mcpbox_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
use mcpbox_storage::{
    ApprovalRepo, AuthRepo, CredentialRepo, Database, LogRepo, ServerRepo, SettingRepo, ToolRepo,
};

use crate::error::{ApiError, ApiResult};
use crate::middleware::RateLimiter;
use crate::sandbox_client::SandboxClient;
use crate::services::approval::ApprovalEngine;
use crate::services::auth::AuthService;
use crate::services::credentials::CredentialService;
use crate::services::email_policy::EmailPolicyCache;
use crate::services::execution_log::ExecutionLogService;
use crate::services::export_import::ExportImportService;
use crate::services::oauth::OAuthService;
use crate::services::secrets::SecretService;

pub struct AppState {
    pub config: McpboxConfig,
    pub db: Database,
    pub encryption_key: EncryptionKey,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub sandbox: SandboxClient,
    pub auth: AuthService,
    pub email_policy: EmailPolicyCache,
    pub credentials: CredentialService,
    pub secrets: SecretService,
    pub oauth: Arc<OAuthService>,
    pub approval: ApprovalEngine,
    pub export_import: ExportImportService,
    pub logs: ExecutionLogService,
    pub settings: SettingRepo,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn build(config: McpboxConfig, db: Database) -> ApiResult<Arc<Self>> {
        let encryption_key =
            EncryptionKey::from_hex(&config.security.encryption_key_hex, config.security.ci)
                .map_err(|e| ApiError::internal(format!("encryption key: {e}")))?;

        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let sandbox = SandboxClient::new(
            config.gateway.sandbox_url.clone(),
            config.security.sandbox_api_key.clone(),
            breakers.clone(),
        );

        let auth = AuthService::new(
            AuthRepo::new(db.clone()),
            &config.security.jwt_secret_key,
            config.gateway.access_token_ttl,
            config.gateway.refresh_token_ttl,
        );
        let email_policy = EmailPolicyCache::new(SettingRepo::new(db.clone()));
        let credentials =
            CredentialService::new(CredentialRepo::new(db.clone()), encryption_key.clone());
        let secrets = SecretService::new(ServerRepo::new(db.clone()), encryption_key.clone());
        let oauth = Arc::new(OAuthService::new(
            credentials.clone(),
            format!("http://{}/api/oauth/callback", config.gateway.bind_addr),
        ));
        let approval = ApprovalEngine::new(
            ServerRepo::new(db.clone()),
            ToolRepo::new(db.clone()),
            ApprovalRepo::new(db.clone()),
            SettingRepo::new(db.clone()),
            secrets.clone(),
            sandbox.clone(),
        );
        let export_import = ExportImportService::new(
            ServerRepo::new(db.clone()),
            ToolRepo::new(db.clone()),
            encryption_key.clone(),
        );
        let logs = ExecutionLogService::new(LogRepo::new(db.clone()));
        let rate_limiter = RateLimiter::new(
            config.rate_limit.clone(),
            config.security.trusted_proxy_ips.clone(),
        );

        Ok(Arc::new(Self {
            settings: SettingRepo::new(db.clone()),
            config,
            db,
            encryption_key,
            breakers,
            sandbox,
            auth,
            email_policy,
            credentials,
            secrets,
            oauth,
            approval,
            export_import,
            logs,
            rate_limiter,
        }))
    }
}
