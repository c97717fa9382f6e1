//! Authentication API handlers
//!
//! Provides HTTP endpoints for registration, login, token rotation, logout,
//! and session revocation.
//!
//! Author: hephaex@gmail.com

use crate::audit::ClientContext;
use crate::auth::{
    AuthResponse, AuthenticatedUser, GoogleLoginRequest, LoginRequest, LogoutRequest,
    RefreshRequest, RegisterRequest, UserInfo,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Generic message response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Revoke-all response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeAllResponse {
    /// Number of refresh tokens revoked
    pub revoked: u64,
}

/// Unwrap a JSON body, reporting malformed input as a validation error
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

/// Register a new user account
///
/// Creates a password account and starts its first session.
///
/// # Request Body
///
/// * `email` - Valid email address (unique, case-insensitive)
/// * `password` - 8 to 72 characters
/// * `display_name` - 2 to 50 characters
///
/// # Responses
///
/// * `201 Created` - User registered, returns tokens
/// * `400 Bad Request` - Invalid input
/// * `409 Conflict` - Email already registered
/// * `500 Internal Server Error` - Server error
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let ctx = ClientContext::from_headers(&headers);
    let response = state.sessions.register(request, &ctx).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with email and password
///
/// # Responses
///
/// * `200 OK` - Authentication successful, returns tokens
/// * `401 Unauthorized` - Authentication failed
/// * `500 Internal Server Error` - Server error
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Authentication failed", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let ctx = ClientContext::from_headers(&headers);
    let response = state.sessions.login(request, &ctx).await?;

    Ok(Json(response))
}

/// Login with a Google ID token
///
/// Verifies the token against Google's published keys and the configured
/// client ID. A first-time Google user gets a new account.
#[utoipa::path(
    post,
    path = "/api/v1/auth/google",
    tag = "auth",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Authentication failed", body = crate::error::ApiError),
        (status = 409, description = "Email registered with a password account", body = crate::error::ApiError),
        (status = 503, description = "Google sign-in not configured", body = crate::error::ApiError),
    )
)]
pub async fn google_login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GoogleLoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let ctx = ClientContext::from_headers(&headers);
    let response = state
        .sessions
        .login_with_identity(&request.id_token, &ctx)
        .await?;

    Ok(Json(response))
}

/// Refresh access token
///
/// Exchanges a valid refresh token for a new pair. The presented refresh
/// token is revoked and cannot be used again.
///
/// # Responses
///
/// * `200 OK` - New tokens issued
/// * `401 Unauthorized` - Invalid, expired, revoked, or reused refresh token
/// * `500 Internal Server Error` - Server error
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = AuthResponse),
        (status = 401, description = "Authentication failed", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let ctx = ClientContext::from_headers(&headers);
    let response = state.sessions.refresh(&request.refresh_token, &ctx).await?;

    Ok(Json(response))
}

/// Logout a session
///
/// Revokes the presented refresh token. The response is the same whether or
/// not the token was valid.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(payload)?;
    let ctx = ClientContext::from_headers(&headers);
    state.sessions.logout(&request.refresh_token, &ctx).await?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// Get current user profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user profile", body = UserInfo),
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
    let user_info = state.sessions.current_user(user.user_id).await?;

    Ok(Json(user_info))
}

/// Revoke every session of the current user
#[utoipa::path(
    post,
    path = "/api/v1/auth/revoke-all",
    tag = "auth",
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeAllResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn revoke_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.sessions.revoke_all(user.user_id, None).await?;

    Ok(Json(RevokeAllResponse { revoked }))
}

/// Revoke every session of another user (admin only)
#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/revoke-all",
    tag = "admin",
    params(
        ("id" = Uuid, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeAllResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Admin role required", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn admin_revoke_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    target: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Path(user_id) = target.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let revoked = state
        .sessions
        .revoke_all(user_id, Some(admin.user_id))
        .await?;

    Ok(Json(RevokeAllResponse { revoked }))
}
