//! Access-token guard for protected routes
//!
//! Extracts and validates the bearer access token from the Authorization
//! header. On success, adds the authenticated user to request extensions.
use super::jwt::{extract_bearer_token, Claims, JwtError};
use super::models::ADMIN_ROLE;
use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Authenticated user information extracted from an access token
///
/// Handlers extract it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    /// Token ID of the access token
    pub jti: String,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = JwtError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: claims.user_id()?,
            email: claims.email,
            roles: claims.roles,
            jti: claims.jti,
        })
    }
}

/// Authentication middleware that requires a valid access token
///
/// A missing header yields `401 UNAUTHORIZED`. Any presented token that
/// fails verification, including a refresh token, yields the opaque
/// `401 AUTHENTICATION_FAILED`.
///
/// # Usage
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use encore_api::auth::middleware::auth_middleware;
///
/// let app = Router::new()
///     .route("/protected", get(protected_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::AuthenticationFailed)?;

    let token = extract_bearer_token(auth_header).ok_or(AppError::AuthenticationFailed)?;

    let user = state
        .sessions
        .codec()
        .verify_access(token)
        .and_then(AuthenticatedUser::try_from)
        .map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AppError::AuthenticationFailed
        })?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AppError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Must be layered inside `auth_middleware`. Admins pass every role check.
///
/// # Example
///
/// ```ignore
/// let admin = Router::new()
///     .route("/admin/users/:id/revoke-all", post(admin_revoke_all_handler))
///     .route_layer(middleware::from_fn(require_role("admin")))
///     .route_layer(middleware::from_fn_with_state(state, auth_middleware));
/// ```
pub fn require_role(
    required_role: &'static str,
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = request
                .extensions()
                .get::<AuthenticatedUser>()
                .ok_or(AppError::Unauthorized)?
                .clone();

            if !user.has_role(required_role) && !user.is_admin() {
                audit_log(&AuditEvent::AccessDenied {
                    user_id: user.user_id,
                    resource: request.uri().path().to_string(),
                    required_role: required_role.to_string(),
                });

                return Err(AppError::Forbidden);
            }

            Ok(next.run(request).await)
        })
    }
}
