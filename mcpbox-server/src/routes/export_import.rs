//! Signed export/import endpoints

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::Value as JsonValue;

use crate::error::ApiResult;
use crate::middleware::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/export", get(export))
        .route("/import", post(import))
}

async fn export(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<JsonValue>> {
    let document = state.export_import.export().await?;
    state
        .logs
        .record_activity("export", "export", Some(&ctx.username), None, None, None, None)
        .await;
    Ok(Json(document))
}

async fn import(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(document): Json<JsonValue>,
) -> ApiResult<Json<JsonValue>> {
    let report = state.export_import.import(&state.approval, &document).await?;
    state
        .logs
        .record_activity(
            "export",
            "import",
            Some(&ctx.username),
            None,
            None,
            None,
            Some(serde_json::json!({
                "imported": report.imported_servers,
                "skipped": report.skipped_servers,
            })),
        )
        .await;
    Ok(Json(serde_json::to_value(report).expect("report serialises")))
}
