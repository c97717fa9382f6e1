//! Session error taxonomy
//!
//! Credential and token failures collapse into one opaque outward signal
//! when converted to an HTTP response; see `crate::error`.

use super::google::IdentityError;
use super::jwt::JwtError;
use super::password::PasswordError;
use super::repository::RepositoryError;
use thiserror::Error;

/// Errors returned by `SessionService`
#[derive(Debug, Error)]
pub enum AuthError {
    /// Bad email/password, or a malformed, expired or wrong-type token
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Registration with an email that is already taken
    #[error("Account already exists")]
    AccountExists,

    #[error("Identity assertion rejected: {0}")]
    IdentityAssertionInvalid(#[source] IdentityError),

    #[error("Identity login is not configured")]
    IdentityNotConfigured,

    #[error("Refresh token not found")]
    TokenNotFound,

    #[error("Refresh token revoked or expired")]
    TokenRevokedOrExpired,

    /// Stored hash could not be produced or parsed
    #[error("Password hash error: {0}")]
    HashFormat(#[from] PasswordError),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Failures that must all look the same to the caller
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::IdentityAssertionInvalid(_)
                | AuthError::TokenNotFound
                | AuthError::TokenRevokedOrExpired
        )
    }
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::EmailAlreadyExists => AuthError::AccountExists,
            RepositoryError::TokenNotFound => AuthError::TokenNotFound,
            RepositoryError::DuplicateTokenId => {
                AuthError::Internal("refresh token id collision".to_string())
            }
            RepositoryError::DatabaseError(msg) => AuthError::Storage(msg),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::EncodingError(e) => AuthError::Internal(format!("token signing failed: {e}")),
            JwtError::SystemTimeError(e) => AuthError::Internal(e.to_string()),
            JwtError::UnsupportedAlgorithm(alg) => {
                AuthError::Internal(format!("unsupported algorithm {alg}"))
            }
            JwtError::LifetimeOutOfRange(ttl) => {
                AuthError::Internal(format!("token lifetime {ttl}s out of range"))
            }
            _ => AuthError::InvalidCredentials,
        }
    }
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotConfigured => AuthError::IdentityNotConfigured,
            IdentityError::KeyFetch(msg) => {
                AuthError::Internal(format!("identity provider keys unavailable: {msg}"))
            }
            other => AuthError::IdentityAssertionInvalid(other),
        }
    }
}
