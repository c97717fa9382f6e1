//! API error handling
//!
//! Author: hephaex@gmail.com

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

    pub fn validation(details: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", "Request validation failed").with_details(details)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn authentication_failed() -> Self {
        Self::new("AUTHENTICATION_FAILED", "Authentication failed")
    }

    pub fn user_exists() -> Self {
        Self::new("USER_EXISTS", "A user with this email already exists")
    }

    pub fn forbidden() -> Self {
        Self::new("FORBIDDEN", "Access denied")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    /// No credentials were presented
    Unauthorized,
    /// Credentials or tokens were presented and rejected
    AuthenticationFailed,
    Conflict,
    Forbidden,
    ServiceUnavailable(String),
    Internal(String),
    Database(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::Validation(details) => {
                (StatusCode::BAD_REQUEST, ApiError::validation(details))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, ApiError::unauthorized()),
            AppError::AuthenticationFailed => {
                (StatusCode::UNAUTHORIZED, ApiError::authentication_failed())
            }
            AppError::Conflict => (StatusCode::CONFLICT, ApiError::user_exists()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, ApiError::forbidden()),
            AppError::ServiceUnavailable(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("SERVICE_UNAVAILABLE", format!("{what} is not available")),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        if err.is_authentication_failure() {
            tracing::debug!(reason = %err, "Authentication failed");
            return AppError::AuthenticationFailed;
        }

        match err {
            AuthError::AccountExists => AppError::Conflict,
            AuthError::InvalidInput(details) => AppError::Validation(details),
            AuthError::IdentityNotConfigured => {
                AppError::ServiceUnavailable("Google sign-in".to_string())
            }
            AuthError::Storage(msg) => AppError::Database(msg),
            AuthError::HashFormat(e) => AppError::Internal(e.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
            // Covered by is_authentication_failure above
            AuthError::InvalidCredentials
            | AuthError::IdentityAssertionInvalid(_)
            | AuthError::TokenNotFound
            | AuthError::TokenRevokedOrExpired => AppError::AuthenticationFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_auth_failures_are_indistinguishable() {
        let a = render(AuthError::InvalidCredentials.into()).await;
        let b = render(AuthError::TokenRevokedOrExpired.into()).await;
        let c = render(AuthError::TokenNotFound.into()).await;

        assert_eq!(a.0, StatusCode::UNAUTHORIZED);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.1["code"], "AUTHENTICATION_FAILED");
    }

    #[tokio::test]
    async fn test_internal_details_not_exposed() {
        let (status, body) = render(AuthError::Storage("connection refused".into()).into()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_account_exists_is_conflict() {
        let (status, body) = render(AuthError::AccountExists.into()).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "USER_EXISTS");
    }

    #[tokio::test]
    async fn test_validation_details() {
        let (status, body) =
            render(AuthError::InvalidInput("password: too short".into()).into()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"], "password: too short");
    }
}
