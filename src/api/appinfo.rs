//! Application info endpoints
//!
//! - GET /v1/appinfo/apikey - issue an API key (admin role)

use axum::{extract::State, Json};

use crate::api::middleware::{ApiError, AppState};
use crate::api::users::TokenResponse;

/// GET /v1/appinfo/apikey
pub async fn api_key(State(state): State<AppState>) -> Result<Json<TokenResponse>, ApiError> {
    let key = state.session_service.issue_api_key()?;
    tracing::info!("API key issued");
    Ok(Json(key.into()))
}
