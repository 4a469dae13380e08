//! Authentication API handlers
//!
//! Login, logout, profile, password change and the password-reset pair.

use crate::auth::middleware::BearerToken;
use crate::auth::{AuthError, AuthenticatedUser, LoginResponse};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Extension, Json};
use cobros_core::AccountSummary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Generic reply for password-reset requests
pub const RESET_REQUESTED_MESSAGE: &str =
    "If the account is registered, you will receive a message with instructions";

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    /// Handle or email
    #[serde(alias = "username", alias = "email")]
    #[validate(length(min = 1, max = 255))]
    pub identifier: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Logout options
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    /// Also revoke every other session of the account
    #[serde(default)]
    pub all_sessions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 1))]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct ForgotPasswordRequest {
    /// Handle or email
    #[serde(alias = "email")]
    #[validate(length(min = 1, max = 255))]
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 1))]
    pub new_password: String,
}

/// Plain acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
    /// Only present when the server runs with reset-token exposure enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reset_token: None,
        }
    }
}

/// Login with handle or email and password
///
/// Five failed attempts within 30 minutes lock the account until the window
/// passes or an administrator unlocks it.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 403, description = "Account inactive", body = crate::error::ApiError),
        (status = 429, description = "Too many failed attempts", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    match state.auth.login(&request.identifier, &request.password).await {
        Ok(response) => {
            state.metrics.record_login_success();
            Ok(Json(response))
        }
        Err(e) => {
            match e {
                AuthError::TooManyAttempts => state.metrics.record_lockout(),
                _ => state.metrics.record_login_failure(),
            }
            Err(e.into())
        }
    }
}

/// Logout current session
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body(content = LogoutRequest, description = "Logout options (optional)"),
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<BearerToken>,
    request: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = request.unwrap_or_default();
    state.auth.logout(&token.0, request.all_sessions).await?;

    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Get current account profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current account", body = AccountSummary),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.auth.current_account(user.account_id).await?))
}

/// Change own password
///
/// Every session of the account, including the current one, is revoked.
#[utoipa::path(
    post,
    path = "/api/v1/auth/change-password",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Weak password", body = crate::error::ApiError),
        (status = 401, description = "Current password incorrect", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    state
        .auth
        .change_own_password(
            user.account_id,
            &request.current_password,
            &request.new_password,
        )
        .await?;

    Ok(Json(MessageResponse::new(
        "Password changed, please log in again",
    )))
}

/// Request a password reset
///
/// Always answers with the same message, whether or not the identifier
/// belongs to an account.
#[utoipa::path(
    post,
    path = "/api/v1/auth/forgot-password",
    tag = "auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
    )
)]
pub async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> impl IntoResponse {
    let mut response = MessageResponse::new(RESET_REQUESTED_MESSAGE);
    if request.validate().is_err() {
        return Json(response);
    }

    match state.auth.generate_reset_token(request.identifier.trim()).await {
        Ok(reset) => {
            // Delivery is out of band; dev setups can read the token directly.
            if state.config.auth.expose_reset_token {
                response.reset_token = Some(reset.token);
            }
        }
        Err(AuthError::NotFound) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to generate reset token"),
    }

    Json(response)
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/api/v1/auth/reset-password",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Weak password or wrong token type", body = crate::error::ApiError),
        (status = 401, description = "Expired or revoked token", body = crate::error::ApiError),
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    state
        .auth
        .reset_password(&request.token, &request.new_password)
        .await?;

    Ok(Json(MessageResponse::new("Password has been reset")))
}
