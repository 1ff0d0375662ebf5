//! User endpoints
//!
//! - POST /v1/users/signup - customer sign-up (X-Api-Key)
//! - POST /v1/users/signup-admin - admin sign-up (X-Admin-Token)
//! - POST /v1/users/signin - credentials for a passport
//! - POST /v1/users/refresh - rotate a passport
//! - POST /v1/users/signout - end a session
//! - GET /v1/users/admin/secret - admin token (admin role)
//! - GET /v1/users/{user_id} - profile (self or admin)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::error::ErrorKind;
use crate::models::{Passport, RoleClass, UserProfile};
use crate::services::{SessionServiceError, SignUpInput, SignedToken};

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct SignOutRequest {
    pub session_id: String,
}

/// A claim-less token handed out to a privileged caller
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

impl From<SignedToken> for TokenResponse {
    fn from(signed: SignedToken) -> Self {
        Self {
            token: signed.token,
            expires_at: signed.expires_at,
        }
    }
}

async fn sign_up_as(
    state: &AppState,
    body: SignUpRequest,
    role: RoleClass,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let input = SignUpInput::new(body.email, body.username, body.password, role);
    let profile = state.session_service.sign_up(input).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// POST /v1/users/signup
pub async fn sign_up(
    State(state): State<AppState>,
    Json(body): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    sign_up_as(&state, body, RoleClass::Customer).await
}

/// POST /v1/users/signup-admin
pub async fn sign_up_admin(
    State(state): State<AppState>,
    Json(body): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    sign_up_as(&state, body, RoleClass::Admin).await
}

/// POST /v1/users/signin
///
/// Unknown email and wrong password get the same answer.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInRequest>,
) -> Result<Json<Passport>, ApiError> {
    let passport = state
        .session_service
        .sign_in(&body.email, &body.password)
        .await
        .map_err(|e| match e {
            SessionServiceError::UserNotFound | SessionServiceError::InvalidPassword => {
                ApiError::new(ErrorKind::InvalidCredential, "Invalid email or password")
            }
            other => ApiError::from(other),
        })?;

    Ok(Json(passport))
}

/// POST /v1/users/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<Passport>, ApiError> {
    let passport = state
        .session_service
        .refresh_passport(&body.refresh_token)
        .await?;
    Ok(Json(passport))
}

/// POST /v1/users/signout
pub async fn sign_out(
    State(state): State<AppState>,
    Json(body): Json<SignOutRequest>,
) -> Result<StatusCode, ApiError> {
    state.session_service.sign_out(&body.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/users/admin/secret
pub async fn admin_secret(State(state): State<AppState>) -> Result<Json<TokenResponse>, ApiError> {
    let token = state.session_service.issue_admin_token()?;
    Ok(Json(token.into()))
}

/// GET /v1/users/{user_id}
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state.session_service.get_profile(user_id).await?;
    Ok(Json(profile))
}
