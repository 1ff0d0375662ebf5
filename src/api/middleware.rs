//! API middleware
//!
//! Adapters that put the authorization gate in front of routes:
//! - `require_auth` - bearer access token backed by a live session
//! - `authorize` - role check against a fixed list of role ids
//! - `params_check` - own records only, unless admin
//! - `require_api_key` / `require_admin_token` - claim-less token headers
//!
//! Also holds the shared state and the error body every handler returns.

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
use crate::db::DynDatabasePool;
use crate::error::ErrorKind;
use crate::services::{
    AuthContext, AuthorizationGate, GateError, SessionCache, SessionService, SessionServiceError,
    TokenCodec,
};

/// Header carrying an API key for public sign-up
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying an admin token for admin sign-up
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub session_service: Arc<SessionService>,
    pub gate: Arc<AuthorizationGate>,
    pub server_name: Arc<str>,
}

impl AppState {
    /// Wire repositories, codec, cache and services from configuration.
    pub fn new(pool: DynDatabasePool, config: &Config) -> Self {
        let timeout = config.database.query_timeout();
        let users = SqlxUserRepository::boxed(pool.clone(), timeout);
        let sessions = SqlxSessionRepository::boxed(pool.clone(), timeout);
        let codec = TokenCodec::new(&config.jwt);
        let cache = SessionCache::new(&config.session_cache);

        let session_service = SessionService::new(
            users.clone(),
            sessions.clone(),
            codec.clone(),
            cache.clone(),
        );
        let gate = AuthorizationGate::new(codec, users, sessions, cache);

        Self {
            pool,
            session_service: Arc::new(session_service),
            gate: Arc::new(gate),
            server_name: Arc::from(config.server.name.as_str()),
        }
    }
}

/// Error response for API errors
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            error: ApiErrorDetail {
                code: kind.code().to_string(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidToken, message)
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::NoPermission, "No permission")
    }

    pub fn unavailable() -> Self {
        Self::new(ErrorKind::Unavailable, "Service temporarily unavailable")
    }

    pub fn internal_error() -> Self {
        Self::new(ErrorKind::Internal, "Internal server error")
    }
}

/// Transport status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidCredential | ErrorKind::InvalidToken | ErrorKind::Expired => {
            StatusCode::UNAUTHORIZED
        }
        ErrorKind::NoPermission => StatusCode::FORBIDDEN,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(self.kind), Json(self)).into_response()
    }
}

impl From<SessionServiceError> for ApiError {
    fn from(err: SessionServiceError) -> Self {
        match err.kind() {
            ErrorKind::Unavailable => {
                tracing::warn!("Store unavailable: {}", err);
                ApiError::unavailable()
            }
            ErrorKind::Internal => {
                tracing::error!("Session service failure: {}", err);
                ApiError::internal_error()
            }
            ErrorKind::InvalidToken => ApiError::unauthorized("Invalid token"),
            ErrorKind::Expired => ApiError::new(ErrorKind::Expired, "Token expired"),
            kind => ApiError::new(kind, err.to_string()),
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err.kind() {
            ErrorKind::NoPermission => ApiError::forbidden(),
            ErrorKind::Expired => ApiError::new(ErrorKind::Expired, "Token expired"),
            ErrorKind::Unavailable => {
                tracing::warn!("Store unavailable during authorization: {}", err);
                ApiError::unavailable()
            }
            ErrorKind::Internal => {
                tracing::error!("Authorization failure: {}", err);
                ApiError::internal_error()
            }
            _ => ApiError::unauthorized("Missing or invalid credentials"),
        }
    }
}

/// Bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header_token<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
///
/// Inserts the caller's [`AuthContext`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .map(str::to_owned)
        .ok_or(GateError::MissingCredentials)?;
    let auth = state.gate.authenticate(&token).await?;

    request.extensions_mut().insert(auth);
    Ok(next.run(request).await)
}

/// Role list a route group was registered with
#[derive(Clone)]
pub struct RoleGuard {
    pub gate: Arc<AuthorizationGate>,
    pub allowed: Arc<[i64]>,
}

impl RoleGuard {
    pub fn new(gate: Arc<AuthorizationGate>, allowed: &[i64]) -> Self {
        Self {
            gate,
            allowed: Arc::from(allowed),
        }
    }
}

/// Role middleware, layered inside `require_auth`
pub async fn authorize(
    State(guard): State<RoleGuard>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard.gate.authorize(&auth, &guard.allowed).await?;
    Ok(next.run(request).await)
}

/// Path ownership middleware for `/{user_id}` routes, layered inside `require_auth`
pub async fn params_check(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<i64>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state.gate.params_check(&auth, user_id)?;
    Ok(next.run(request).await)
}

/// Requires a valid API key in `X-Api-Key`
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = header_token(request.headers(), API_KEY_HEADER).ok_or(GateError::MissingCredentials)?;
    state.gate.authenticate_api_key(key)?;
    Ok(next.run(request).await)
}

/// Requires a valid admin token in `X-Admin-Token`
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token =
        header_token(request.headers(), ADMIN_TOKEN_HEADER).ok_or(GateError::MissingCredentials)?;
    state.gate.authenticate_admin_token(token)?;
    Ok(next.run(request).await)
}
