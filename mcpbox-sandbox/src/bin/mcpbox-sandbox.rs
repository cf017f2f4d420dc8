//! Sandbox service entry point

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcpbox_config::{env_lookup, EnvLookup, SandboxConfig, Validatable};
use mcpbox_sandbox::limits::{set_resource_limits, validate_resource_limits};
use mcpbox_sandbox::service::{router, SandboxState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let env = env_lookup();
    let config = SandboxConfig::from_env(&env).context("loading sandbox configuration")?;
    config.validate().context("validating sandbox configuration")?;

    let api_key = env
        .get("SANDBOX_API_KEY")
        .context("SANDBOX_API_KEY is required")?;

    // Resource limits are applied once, before the first request
    let limit_status = set_resource_limits(&config);
    if let Err(e) = validate_resource_limits(&config, &limit_status) {
        if config.require_resource_limits {
            error!("SECURITY: {e}");
        } else {
            tracing::warn!("SECURITY WARNING: {e}");
        }
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(SandboxState::new(config, api_key, limit_status));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding sandbox service to {bind_addr}"))?;
    info!(addr = %bind_addr, "sandbox service listening");

    axum::serve(listener, app).await.context("serving sandbox")?;
    Ok(())
}
