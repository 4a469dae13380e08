//! Cobros API - authentication core and REST server
//!
//! Login with lockout, JWT sessions with revocation, password reset,
//! role/permission/ownership gates and account administration over axum.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use chrono::Utc;
use cobros_core::{AppConfig, ManualClock, MemoryStore};
use state::{AppState, Backends};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Create the application router with all middleware applied
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .merge(routes::health_routes())
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", routes::ApiDoc::openapi()))
        .layer(from_fn_with_state(state.clone(), middleware::metrics_middleware))
        .layer(from_fn(middleware::security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Cross-origin policy from the configured origin list
///
/// An empty list sends no CORS headers, so browsers only allow same-origin
/// calls.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

/// Signing secret used by [`create_router_for_testing`]
pub const TEST_JWT_SECRET: &str = "cobros-test-secret-with-enough-entropy-0123456789";

/// In-memory router for integration tests
///
/// Returns the router, its state, the backing store and the clock driving
/// every expiry and lockout decision. Hashing runs at a low cost.
/// Must be called inside a Tokio runtime.
pub fn create_router_for_testing() -> (Router, Arc<AppState>, Arc<MemoryStore>, ManualClock) {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = TEST_JWT_SECRET.to_string();

    let clock = ManualClock::new(Utc::now());
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    let password_config = auth::PasswordConfig {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
        output_len: Some(32),
    };

    let state = Arc::new(AppState::with_password_config(
        config,
        Backends::memory(store.clone()),
        Arc::new(clock.clone()),
        password_config,
    ));

    (create_router(state.clone()), state, Arc::new(store), clock)
}
