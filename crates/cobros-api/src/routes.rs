//! API route definitions

use crate::auth::{auth_middleware, require_owner, require_permission, AccountPathOwner};
use crate::handlers::{auth, health, users};
use crate::state::AppState;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use cobros_core::Permission;
use std::sync::Arc;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

const MANAGE_USERS: &[Permission] = &[Permission::UsuariosGestionar];

/// Create API v1 routes
///
/// The gates are layered inside `auth_middleware`, so they always see a
/// verified identity.
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/forgot-password", post(auth::forgot_password_handler))
        .route("/auth/reset-password", post(auth::reset_password_handler));

    let manage_users = from_fn_with_state(state.clone(), require_permission(MANAGE_USERS));
    let owner_or_admin = from_fn_with_state(state.clone(), require_owner(Arc::new(AccountPathOwner)));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/change-password", post(auth::change_password_handler))
        // Account administration
        .route(
            "/users",
            get(users::list_users)
                .post(users::create_user)
                .route_layer(manage_users.clone()),
        )
        .route(
            "/users/:id",
            get(users::get_user)
                .route_layer(owner_or_admin)
                .merge(
                    put(users::update_user)
                        .delete(users::delete_user)
                        .route_layer(manage_users.clone()),
                ),
        )
        .route(
            "/users/:id/unlock",
            post(users::unlock_user).route_layer(manage_users.clone()),
        )
        .route(
            "/users/:id/revoke-sessions",
            post(users::revoke_user_sessions).route_layer(manage_users),
        )
        .layer(from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health and metrics endpoints, served outside `/api/v1`
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::prometheus_metrics))
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cobros API",
        description = "Authentication and account administration for the Cobros back office"
    ),
    paths(
        health::health_check,
        health::readiness_check,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        auth::change_password_handler,
        auth::forgot_password_handler,
        auth::reset_password_handler,
        users::list_users,
        users::create_user,
        users::get_user,
        users::update_user,
        users::delete_user,
        users::unlock_user,
        users::revoke_user_sessions,
    ),
    components(schemas(
        crate::error::ApiError,
        health::HealthResponse,
        health::ReadinessResponse,
        auth::LoginRequest,
        auth::LogoutRequest,
        auth::ChangePasswordRequest,
        auth::ForgotPasswordRequest,
        auth::ResetPasswordRequest,
        auth::MessageResponse,
        users::CreateUserRequest,
        users::UpdateUserRequest,
        crate::auth::LoginResponse,
        cobros_core::AccountSummary,
        cobros_core::Role,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "auth", description = "Login, logout and password management"),
        (name = "users", description = "Account administration"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_auth_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/auth/login"));
        assert!(doc.paths.paths.contains_key("/api/v1/users/{id}"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
