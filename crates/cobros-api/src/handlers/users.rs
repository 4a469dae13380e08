//! Account administration handlers
//!
//! Mounted behind `require_permission(&[Permission::UsuariosGestionar])`,
//! except `GET /users/:id`, which the account owner may also read.

use super::auth::MessageResponse;
use crate::auth::{AuthenticatedUser, CreateAccount};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use cobros_core::{AccountChanges, AccountSummary, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

fn default_role() -> Role {
    Role::User
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 64))]
    pub handle: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 128))]
    pub display_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl From<UpdateUserRequest> for AccountChanges {
    fn from(request: UpdateUserRequest) -> Self {
        AccountChanges {
            display_name: request.display_name,
            email: request.email,
            role: request.role,
            is_active: request.is_active,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    responses(
        (status = 200, description = "All accounts", body = [AccountSummary]),
        (status = 403, description = "Insufficient permissions", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.list_accounts().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Account created", body = AccountSummary),
        (status = 400, description = "Invalid input or weak password", body = crate::error::ApiError),
        (status = 409, description = "Handle or email already in use", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let account = state
        .accounts
        .create_account(
            CreateAccount {
                handle: request.handle,
                email: request.email,
                display_name: request.display_name,
                password: request.password,
                role: request.role,
                is_active: request.is_active,
            },
            Some(user.account_id),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Account", body = AccountSummary),
        (status = 404, description = "Not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.get_account(id).await?))
}

/// Update profile, role or status
///
/// Deactivating or demoting the last active administrator is refused with 409.
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "Account ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated account", body = AccountSummary),
        (status = 404, description = "Not found", body = crate::error::ApiError),
        (status = 409, description = "Last active administrator", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let account = state
        .accounts
        .update_account(id, request.into(), Some(user.account_id))
        .await?;

    Ok(Json(account))
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 404, description = "Not found", body = crate::error::ApiError),
        (status = 409, description = "Last active administrator", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .accounts
        .delete_account(id, Some(user.account_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Clear the failed-login lockout of an account
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/unlock",
    tag = "users",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Account unlocked", body = MessageResponse),
        (status = 404, description = "Not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn unlock_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.unlock(id, Some(user.account_id)).await?;
    Ok(Json(MessageResponse::new("Account unlocked")))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/revoke-sessions",
    tag = "users",
    params(("id" = Uuid, Path, description = "Account ID")),
    responses(
        (status = 200, description = "Sessions revoked", body = MessageResponse),
        (status = 404, description = "Not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_user_sessions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .accounts
        .revoke_sessions(id, Some(user.account_id))
        .await?;
    Ok(Json(MessageResponse::new("All sessions revoked")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let request: CreateUserRequest = serde_json::from_str(
            r#"{"handle":"ana","email":"ana@example.com","display_name":"Ana","password":"x"}"#,
        )
        .unwrap();
        assert_eq!(request.role, Role::User);
        assert!(request.is_active);
    }

    #[test]
    fn test_create_request_validation() {
        let request = CreateUserRequest {
            handle: "an".to_string(),
            email: "not-an-email".to_string(),
            display_name: "Ana".to_string(),
            password: "x".to_string(),
            role: Role::User,
            is_active: true,
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("handle"));
        assert!(fields.contains_key("email"));
    }

    #[test]
    fn test_update_request_into_changes() {
        let request = UpdateUserRequest {
            is_active: Some(false),
            ..Default::default()
        };
        assert_eq!(AccountChanges::from(request), AccountChanges::deactivate());
    }
}
