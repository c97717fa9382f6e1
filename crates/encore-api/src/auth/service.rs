//! Session service layer
//!
//! Provides business logic for registration, password and Google login,
//! refresh token rotation, logout, and session revocation.
//!
//! Access tokens are stateless. Refresh tokens are backed by a record in the
//! `RefreshTokenStore`, and each refresh revokes the presented record while
//! creating its successor in one storage operation.

use super::error::AuthError;
use super::google::IdentityVerifier;
use super::jwt::{Claims, IssuedPair, TokenCodec};
use super::models::{normalize_email, RefreshTokenRecord, User, UserInfo};
use super::password::{PasswordError, PasswordHasher};
use super::repository::{RefreshTokenStore, UserRepository};
use crate::audit::{audit_log, AuditEvent, ClientContext, LoginMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 72))]
    pub password: String,
    #[validate(length(min = 2, max = 50))]
    pub display_name: String,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Google sign-in request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GoogleLoginRequest {
    /// Google ID token
    pub id_token: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Authentication response with tokens
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub user: UserInfo,
}

/// Session lifecycle orchestration
pub struct SessionService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn RefreshTokenStore>,
    codec: Arc<TokenCodec>,
    hasher: Arc<PasswordHasher>,
    identity: Option<Arc<dyn IdentityVerifier>>,
    revoke_all_on_reuse: bool,
}

impl SessionService {
    /// Create a new session service
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn RefreshTokenStore>,
        codec: Arc<TokenCodec>,
        hasher: Arc<PasswordHasher>,
    ) -> Self {
        Self {
            users,
            tokens,
            codec,
            hasher,
            identity: None,
            revoke_all_on_reuse: false,
        }
    }

    /// Enable Google sign-in
    pub fn with_identity_verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.identity = Some(verifier);
        self
    }

    /// Revoke every session of a user when a rotated token is replayed
    pub fn with_revoke_all_on_reuse(mut self, enabled: bool) -> Self {
        self.revoke_all_on_reuse = enabled;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Register a new user and start a session
    ///
    /// # Arguments
    ///
    /// * `request` - Registration details
    /// * `ctx` - Client metadata for the refresh record
    ///
    /// # Returns
    ///
    /// * `Ok(AuthResponse)` - Token pair and the new user
    /// * `Err(AuthError::InvalidInput)` - If validation fails
    /// * `Err(AuthError::AccountExists)` - If the email is taken
    pub async fn register(
        &self,
        mut request: RegisterRequest,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        request.email = normalize_email(&request.email);
        request.display_name = request.display_name.trim().to_string();
        request
            .validate()
            .map_err(|e| AuthError::InvalidInput(e.to_string()))?;

        let RegisterRequest {
            email,
            password,
            display_name,
        } = request;

        if self.users.find_by_email(&email).await?.is_some() {
            audit_log(&AuditEvent::RegistrationFailure {
                email,
                reason: "email already registered".to_string(),
                ip_address: ctx.ip_address.clone(),
            });
            return Err(AuthError::AccountExists);
        }

        let password_hash = self.hash_blocking(password).await?;
        let user = User::new_local(email, password_hash, display_name);

        if let Err(e) = self.users.create(&user).await {
            let err = AuthError::from(e);
            if matches!(err, AuthError::AccountExists) {
                audit_log(&AuditEvent::RegistrationFailure {
                    email: user.email.clone(),
                    reason: "email already registered".to_string(),
                    ip_address: ctx.ip_address.clone(),
                });
            }
            return Err(err);
        }

        audit_log(&AuditEvent::RegistrationSuccess {
            user_id: user.id,
            email: user.email.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });

        self.start_session(&user, ctx).await
    }

    /// Login with email and password
    ///
    /// Unknown email, inactive account, missing hash, corrupt hash, and wrong
    /// password all return `InvalidCredentials` after one Argon2 run.
    pub async fn login(
        &self,
        request: LoginRequest,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        let email = normalize_email(&request.email);
        let user = self.users.find_by_email(&email).await?;

        let (user, stored_hash) = match user {
            Some(user) if user.is_active => match user.password_hash.clone() {
                Some(hash) => (user, hash),
                None => {
                    self.reject_login_blocking(request.password).await?;
                    return Err(self.login_failed(
                        Some(email),
                        LoginMethod::Password,
                        "no password set",
                        ctx,
                    ));
                }
            },
            Some(_) => {
                self.reject_login_blocking(request.password).await?;
                return Err(self.login_failed(
                    Some(email),
                    LoginMethod::Password,
                    "account inactive",
                    ctx,
                ));
            }
            None => {
                self.reject_login_blocking(request.password).await?;
                return Err(self.login_failed(
                    Some(email),
                    LoginMethod::Password,
                    "unknown email",
                    ctx,
                ));
            }
        };

        match self.verify_blocking(request.password, stored_hash).await? {
            Ok(true) => {}
            Ok(false) => {
                return Err(self.login_failed(
                    Some(email),
                    LoginMethod::Password,
                    "wrong password",
                    ctx,
                ))
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Stored password hash is unusable");
                return Err(self.login_failed(
                    Some(email),
                    LoginMethod::Password,
                    "corrupt password hash",
                    ctx,
                ));
            }
        }

        self.record_login(&user, LoginMethod::Password, ctx).await;
        self.start_session(&user, ctx).await
    }

    /// Login with a Google ID token, provisioning the account if needed
    pub async fn login_with_identity(
        &self,
        assertion: &str,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        let verifier = self
            .identity
            .as_ref()
            .ok_or(AuthError::IdentityNotConfigured)?;

        let identity = match verifier.verify(assertion).await {
            Ok(identity) => identity,
            Err(e) => {
                let err = AuthError::from(e);
                if err.is_authentication_failure() {
                    audit_log(&AuditEvent::LoginFailure {
                        email: None,
                        method: LoginMethod::Google,
                        reason: err.to_string(),
                        ip_address: ctx.ip_address.clone(),
                        user_agent: ctx.user_agent.clone(),
                    });
                }
                return Err(err);
            }
        };

        let user = match self.users.find_by_external_id(&identity.subject).await? {
            Some(user) => user,
            None => {
                let user = self.users.upsert_external(&identity).await?;
                tracing::info!(user_id = %user.id, "Provisioned account from Google identity");
                user
            }
        };

        if !user.is_active {
            return Err(self.login_failed(
                Some(user.email.clone()),
                LoginMethod::Google,
                "account inactive",
                ctx,
            ));
        }

        self.record_login(&user, LoginMethod::Google, ctx).await;
        self.start_session(&user, ctx).await
    }

    /// Exchange a refresh token for a new pair, revoking the presented one
    ///
    /// # Returns
    ///
    /// * `Ok(AuthResponse)` - New access token and rotated refresh token
    /// * `Err(AuthError::InvalidCredentials)` - Token failed verification
    /// * `Err(AuthError::TokenNotFound)` - No record for the token's jti
    /// * `Err(AuthError::TokenRevokedOrExpired)` - Record is no longer valid,
    ///   including when a concurrent refresh of the same token won
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        let claims = self.codec.verify_refresh(refresh_token)?;
        let user_id = claims.user_id()?;

        let record = self.tokens.get_by_token_id(&claims.jti).await?;
        if record.user_id != user_id {
            tracing::warn!(token_id = %claims.jti, "Refresh record owner does not match token subject");
            return Err(AuthError::InvalidCredentials);
        }

        if !record.is_valid_at(Utc::now()) {
            if record.is_rotated() {
                self.on_reuse(&record, ctx).await?;
            }
            return Err(AuthError::TokenRevokedOrExpired);
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidCredentials)?;

        let pair = self.codec.issue_pair(user.id, &user.email, &user.roles)?;
        let replacement = record_from_claims(user.id, &pair.refresh_claims, ctx)?;

        if !self.tokens.rotate(&claims.jti, &replacement).await? {
            // Lost a race against another refresh, logout, or revoke-all
            let current = self.tokens.get_by_token_id(&claims.jti).await?;
            if current.is_rotated() {
                self.on_reuse(&current, ctx).await?;
            }
            return Err(AuthError::TokenRevokedOrExpired);
        }

        audit_log(&AuditEvent::TokenRefresh {
            user_id: user.id,
            old_token_id: claims.jti,
            new_token_id: replacement.token_id,
            ip_address: ctx.ip_address.clone(),
        });

        Ok(self.response(pair, &user))
    }

    /// Revoke the presented refresh token
    ///
    /// Succeeds whether or not the token was valid, known, or already
    /// revoked. Only storage failures are reported.
    pub async fn logout(&self, refresh_token: &str, ctx: &ClientContext) -> Result<(), AuthError> {
        let claims = match self.codec.inspect_refresh(refresh_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Logout with unreadable refresh token");
                return Ok(());
            }
        };

        let revoked = self.tokens.revoke_by_token_id(&claims.jti).await?;
        if revoked {
            if let Ok(user_id) = claims.user_id() {
                audit_log(&AuditEvent::Logout {
                    user_id,
                    token_id: claims.jti,
                    ip_address: ctx.ip_address.clone(),
                });
            }
        }

        Ok(())
    }

    /// Revoke every refresh token of a user
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the sessions
    /// * `revoked_by` - Acting user, if different from the owner
    pub async fn revoke_all(
        &self,
        user_id: Uuid,
        revoked_by: Option<Uuid>,
    ) -> Result<u64, AuthError> {
        let count = self.tokens.revoke_all_for_user(user_id).await?;

        audit_log(&AuditEvent::SessionsRevoked {
            user_id,
            revoked_by,
            count,
        });

        Ok(count)
    }

    /// Delete refresh records that are past their expiry
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let deleted = self.tokens.purge_expired(Utc::now()).await?;
        if deleted > 0 {
            audit_log(&AuditEvent::PurgeCompleted { deleted });
        }
        Ok(deleted)
    }

    /// Profile of the user behind a verified access token
    pub async fn current_user(&self, user_id: Uuid) -> Result<UserInfo, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .map(|u| u.to_info())
            .ok_or(AuthError::InvalidCredentials)
    }

    async fn start_session(
        &self,
        user: &User,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        let pair = self.codec.issue_pair(user.id, &user.email, &user.roles)?;
        let record = record_from_claims(user.id, &pair.refresh_claims, ctx)?;
        self.tokens.create(&record).await?;

        Ok(self.response(pair, user))
    }

    fn response(&self, pair: IssuedPair, user: &User) -> AuthResponse {
        AuthResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
            user: user.to_info(),
        }
    }

    async fn on_reuse(
        &self,
        record: &RefreshTokenRecord,
        ctx: &ClientContext,
    ) -> Result<(), AuthError> {
        let sessions_revoked = if self.revoke_all_on_reuse {
            self.tokens.revoke_all_for_user(record.user_id).await?
        } else {
            0
        };

        audit_log(&AuditEvent::TokenReuseDetected {
            user_id: record.user_id,
            token_id: record.token_id.clone(),
            replaced_by: record.replaced_by.clone(),
            sessions_revoked,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });

        Ok(())
    }

    async fn record_login(&self, user: &User, method: LoginMethod, ctx: &ClientContext) {
        // Bookkeeping only; a failure here must not fail the login
        if let Err(e) = self.users.touch_last_login(user.id, Utc::now()).await {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to update last login");
        }

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email.clone(),
            method,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });
    }

    fn login_failed(
        &self,
        email: Option<String>,
        method: LoginMethod,
        reason: &str,
        ctx: &ClientContext,
    ) -> AuthError {
        audit_log(&login_failure(email, method, reason, ctx));
        AuthError::InvalidCredentials
    }

    async fn hash_blocking(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))??;
        Ok(hash)
    }

    async fn verify_blocking(
        &self,
        password: String,
        hash: String,
    ) -> Result<Result<bool, PasswordError>, AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))
    }

    async fn reject_login_blocking(&self, password: String) -> Result<(), AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify_dummy(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))?;
        Ok(())
    }
}

/// Build the record that mirrors a refresh token's claims
fn record_from_claims(
    user_id: Uuid,
    claims: &Claims,
    ctx: &ClientContext,
) -> Result<RefreshTokenRecord, AuthError> {
    Ok(RefreshTokenRecord::new(
        user_id,
        claims.jti.clone(),
        timestamp(claims.iat)?,
        timestamp(claims.exp)?,
        ctx.user_agent.clone(),
        ctx.ip_address.clone(),
    ))
}

fn login_failure(
    email: Option<String>,
    method: LoginMethod,
    reason: &str,
    ctx: &ClientContext,
) -> AuditEvent {
    AuditEvent::LoginFailure {
        email,
        method,
        reason: reason.to_string(),
        ip_address: ctx.ip_address.clone(),
        user_agent: ctx.user_agent.clone(),
    }
}

fn timestamp(secs: u64) -> Result<DateTime<Utc>, AuthError> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| AuthError::Internal(format!("timestamp out of range: {secs}")))
}
