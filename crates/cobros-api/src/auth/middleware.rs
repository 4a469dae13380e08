/// Authentication and authorization middleware for protecting routes
///
/// `auth_middleware` verifies the bearer token, re-checks the subject
/// account and adds [`AuthenticatedUser`] to the request extensions. The
/// gates (`require_role`, `require_permission`, `require_owner`) are layered
/// after it and read that identity back.
///
/// The administrator bypass is decided only by [`Role::satisfies`] and
/// [`Role::grants`].
use super::service::AuthError;
use crate::audit::{extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, Path, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use cobros_core::{Permission, Role};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Identity of a verified request
///
/// Added to request extensions by [`auth_middleware`]; handlers extract it
/// with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub account_id: Uuid,
    pub handle: String,
    pub role: Role,
    /// JWT ID of the presented token
    pub token_id: String,
}

/// Raw bearer token of the current request, kept for logout
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Extract the token from an Authorization header value
///
/// Accepts `Bearer <token>` as well as a bare token.
pub fn extract_bearer_token(value: &str) -> Option<&str> {
    let value = value.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();

    (!token.is_empty()).then_some(token)
}

/// Authentication middleware that requires a valid session token
///
/// ```ignore
/// let protected = Router::new()
///     .route("/auth/me", get(me_handler))
///     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .map(str::to_string);

    let result = match token.as_deref() {
        Some(token) => state.auth.verify_token(token).await,
        None => Err(AuthError::MissingToken),
    };

    let user = match result {
        Ok(user) => user,
        Err(e) => {
            state.metrics.record_rejected_token();
            state.audit.record(AuditEvent::InvalidToken {
                reason: e.to_string(),
                ip_address: extract_ip_address(request.headers()),
                user_agent: extract_user_agent(request.headers()),
            });
            return Err(e.into());
        }
    };

    state.audit.record(AuditEvent::AccessGranted {
        account_id: user.account_id,
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
    });

    if let Some(token) = token {
        request.extensions_mut().insert(BearerToken(token));
    }
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Fails unless `user` satisfies at least one of `allowed`
pub fn check_role(user: &AuthenticatedUser, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.iter().any(|role| user.role.satisfies(*role)) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions(format!(
            "requires role {}",
            join(allowed)
        )))
    }
}

/// Fails unless `user` holds at least one of `allowed`
pub fn check_permission(
    user: &AuthenticatedUser,
    allowed: &[Permission],
) -> Result<(), AuthError> {
    if allowed.iter().any(|permission| user.role.grants(*permission)) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions(format!(
            "requires permission {}",
            join(allowed)
        )))
    }
}

/// Fails unless `user` owns the resource or satisfies the administrator role
pub fn check_owner(user: &AuthenticatedUser, owner_id: Uuid) -> Result<(), AuthError> {
    if owner_id == user.account_id || user.role.satisfies(Role::Administrator) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions(
            "resource belongs to another account".to_string(),
        ))
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Finds the account that owns the resource addressed by a request
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    /// `Ok(None)` when the resource does not exist
    async fn resolve_owner(
        &self,
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Option<Uuid>, AuthError>;
}

/// Owner of `/users/:id` style routes is the account in the path
pub struct AccountPathOwner;

#[async_trait]
impl OwnerResolver for AccountPathOwner {
    async fn resolve_owner(
        &self,
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Option<Uuid>, AuthError> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|e| AuthError::Validation(e.body_text()))?;
        Ok(Some(id))
    }
}

/// Boxed future returned by the gate middlewares
pub type GateFuture = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send>>;

fn authenticated(request: &Request<Body>) -> Result<AuthenticatedUser, AuthError> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or(AuthError::MissingToken)
}

fn deny(
    state: &AppState,
    request: &Request<Body>,
    user: &AuthenticatedUser,
    err: AuthError,
) -> AppError {
    state.metrics.record_access_denied();
    state.audit.record(AuditEvent::AccessDenied {
        account_id: Some(user.account_id),
        resource: format!("{} {}", request.method(), request.uri().path()),
        required: err.to_string(),
        ip_address: extract_ip_address(request.headers()),
    });
    err.into()
}

/// Middleware factory for role-based access control
///
/// ```ignore
/// let admin = Router::new()
///     .route("/settings", put(update_settings))
///     .route_layer(middleware::from_fn_with_state(
///         state.clone(),
///         require_role(&[Role::Administrator]),
///     ));
/// ```
pub fn require_role(
    allowed: &'static [Role],
) -> impl Fn(State<Arc<AppState>>, Request<Body>, Next) -> GateFuture + Clone {
    move |State(state): State<Arc<AppState>>, request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = authenticated(&request)?;
            if let Err(e) = check_role(&user, allowed) {
                return Err(deny(&state, &request, &user, e));
            }
            Ok(next.run(request).await)
        })
    }
}

/// Middleware factory for permission-based access control (any of)
pub fn require_permission(
    allowed: &'static [Permission],
) -> impl Fn(State<Arc<AppState>>, Request<Body>, Next) -> GateFuture + Clone {
    move |State(state): State<Arc<AppState>>, request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = authenticated(&request)?;
            if let Err(e) = check_permission(&user, allowed) {
                return Err(deny(&state, &request, &user, e));
            }
            Ok(next.run(request).await)
        })
    }
}

/// Middleware factory for ownership checks
///
/// Must be added with `route_layer` so path parameters are available to
/// the resolver.
pub fn require_owner<R>(
    resolver: Arc<R>,
) -> impl Fn(State<Arc<AppState>>, Request<Body>, Next) -> GateFuture + Clone
where
    R: OwnerResolver + 'static,
{
    move |State(state): State<Arc<AppState>>, request: Request<Body>, next: Next| {
        let resolver = resolver.clone();
        Box::pin(async move {
            let user = authenticated(&request)?;

            let (mut parts, body) = request.into_parts();
            let owner = resolver.resolve_owner(&mut parts, &state).await;
            let request = Request::from_parts(parts, body);

            let owner = owner?.ok_or(AuthError::NotFound)?;
            if let Err(e) = check_owner(&user, owner) {
                return Err(deny(&state, &request, &user, e));
            }
            Ok(next.run(request).await)
        })
    }
}
