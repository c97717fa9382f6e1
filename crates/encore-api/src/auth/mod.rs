//! Authentication and session module
//!
//! This module provides the session subsystem with the following components:
//! - Password hashing with Argon2id
//! - Access/refresh token signing and verification
//! - Google ID token verification
//! - Refresh token persistence with rotation and revocation
//! - Session orchestration (register, login, refresh, logout, revoke-all)
//! - Middleware for request authentication

pub mod error;
pub mod google;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod purge;
pub mod repository;
pub mod service;

pub use crate::audit::ClientContext;
pub use error::AuthError;
pub use google::{ExternalIdentity, GoogleIdentityVerifier, IdentityError, IdentityVerifier};
pub use jwt::{extract_bearer_token, Claims, IssuedPair, JwtConfig, JwtError, TokenCodec, TokenType};
pub use middleware::{auth_middleware, require_role, AuthenticatedUser};
pub use models::{RefreshTokenRecord, User, UserInfo};
pub use password::{PasswordConfig, PasswordError, PasswordHasher};
pub use purge::spawn_purge_task;
pub use repository::{
    init_schema, MemoryRefreshTokenStore, MemoryUserRepository, PgRefreshTokenStore,
    PgUserRepository, RefreshTokenStore, RepositoryError, UserRepository,
};
pub use service::{
    AuthResponse, GoogleLoginRequest, LoginRequest, LogoutRequest, RefreshRequest,
    RegisterRequest, SessionService,
};
