//! Management plane entry point

use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcpbox_config::{env_lookup, McpboxConfig};
use mcpbox_server::{jobs, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = McpboxConfig::from_env(&env_lookup()).context("loading configuration")?;
    let db = mcpbox_storage::connect(&config.database)
        .await
        .context("opening database")?;

    let bind_addr = config.gateway.bind_addr.clone();
    let state = AppState::build(config, db).map_err(|e| anyhow::anyhow!("{e:?}"))?;

    // The in-memory blacklist mirror is seeded before the first request
    let seeded = state
        .auth
        .load_blacklist()
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    info!(seeded, "token blacklist mirror loaded");

    jobs::spawn_all(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {bind_addr}"))?;
    info!(addr = %bind_addr, "management plane listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving")?;
    Ok(())
}
