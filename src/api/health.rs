//! Health endpoint

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::middleware::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub name: String,
    pub version: &'static str,
    pub database: &'static str,
}

/// GET /v1/health
///
/// 503 when the database does not answer a ping.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database) = match state.pool.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        status,
        Json(HealthResponse {
            name: state.server_name.to_string(),
            version: env!("CARGO_PKG_VERSION"),
            database,
        }),
    )
}
