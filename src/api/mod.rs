//! API layer - HTTP handlers and routing
//!
//! Everything is served under `/v1`:
//! - Health
//! - User sign-up, sign-in, refresh, sign-out and profile
//! - Admin token and API key issuance

pub mod appinfo;
pub mod health;
pub mod middleware;
pub mod users;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::models::RoleClass;

pub use middleware::{ApiError, AppState, RoleGuard};

/// Build the `/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let admin_only = RoleGuard::new(state.gate.clone(), &[RoleClass::Admin.id()]);

    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .route("/users/admin/secret", get(users::admin_secret))
        .route("/appinfo/apikey", get(appinfo::api_key))
        .route_layer(axum_middleware::from_fn_with_state(
            admin_only,
            middleware::authorize,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Own profile, or any profile for admins
    let profile_routes = Router::new()
        .route("/users/{user_id}", get(users::get_profile))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::params_check,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let signup_routes = Router::new()
        .route("/users/signup", post(users::sign_up))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    let admin_signup_routes = Router::new()
        .route("/users/signup-admin", post(users::sign_up_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin_token,
        ));

    // Public routes
    Router::new()
        .route("/health", get(health::health))
        .route("/users/signin", post(users::sign_in))
        .route("/users/refresh", post(users::refresh))
        .route("/users/signout", post(users::sign_out))
        .merge(admin_routes)
        .merge(profile_routes)
        .merge(signup_routes)
        .merge(admin_signup_routes)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(middleware::API_KEY_HEADER),
            HeaderName::from_static(middleware::ADMIN_TOKEN_HEADER),
        ]);

    if cors_origin == "*" {
        return cors.allow_origin(Any);
    }

    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!("Ignoring unparsable CORS origin '{}'", cors_origin);
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .nest("/v1", build_api_router(state.clone()))
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
