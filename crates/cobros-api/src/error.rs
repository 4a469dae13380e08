//! API error handling
//!
//! Every failure leaving the HTTP boundary goes through [`AppError`] and is
//! rendered as an [`ApiError`] body. Internal details are logged, never
//! returned.

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    BadRequest(String),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(err) => auth_status(err),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::MissingToken
        | AuthError::Expired
        | AuthError::Revoked => StatusCode::UNAUTHORIZED,
        AuthError::Malformed
        | AuthError::StaleOrInactiveSubject
        | AuthError::AccountInactive
        | AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
        AuthError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
        AuthError::WeakPassword { .. }
        | AuthError::InvalidTokenPurpose
        | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::NotFound => StatusCode::NOT_FOUND,
        AuthError::LastAdminProtected | AuthError::Conflict(_) => StatusCode::CONFLICT,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn auth_body(err: &AuthError) -> ApiError {
    match err {
        AuthError::InvalidCredentials => ApiError::new("INVALID_CREDENTIALS", err.to_string()),
        AuthError::AccountInactive => ApiError::new("ACCOUNT_INACTIVE", err.to_string()),
        AuthError::TooManyAttempts => ApiError::new("TOO_MANY_ATTEMPTS", err.to_string()),
        AuthError::Expired => ApiError::new("TOKEN_EXPIRED", err.to_string()),
        AuthError::Malformed => ApiError::new("INVALID_TOKEN", err.to_string()),
        AuthError::Revoked => ApiError::new("TOKEN_REVOKED", err.to_string()),
        AuthError::InvalidTokenPurpose => ApiError::new("INVALID_TOKEN_PURPOSE", err.to_string()),
        AuthError::WeakPassword { feedback } => {
            ApiError::new("WEAK_PASSWORD", "Password is too weak").with_details(feedback.join("; "))
        }
        AuthError::LastAdminProtected => ApiError::new("LAST_ADMIN_PROTECTED", err.to_string()),
        AuthError::StaleOrInactiveSubject => ApiError::new("INACTIVE_SUBJECT", err.to_string()),
        AuthError::NotFound => ApiError::new("NOT_FOUND", "Resource not found"),
        AuthError::MissingToken => ApiError::new("UNAUTHORIZED", err.to_string()),
        AuthError::InsufficientPermissions(what) => {
            ApiError::new("FORBIDDEN", "Insufficient permissions").with_details(what.clone())
        }
        AuthError::Conflict(what) => {
            ApiError::new("CONFLICT", "Handle or email already in use").with_details(what.clone())
        }
        AuthError::Validation(msg) => ApiError::new("BAD_REQUEST", msg.clone()),
        AuthError::Internal(_) => ApiError::internal_error(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            AppError::Auth(AuthError::Internal(details)) | AppError::Internal(details) => {
                tracing::error!(details = %details, "Internal error");
                ApiError::internal_error()
            }
            AppError::Auth(err) => auth_body(err),
            AppError::BadRequest(msg) => ApiError::new("BAD_REQUEST", msg.clone()),
        };

        (status, Json(error)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
