//! JWT token generation and validation
//!
//! Access and refresh tokens share one claim shape and differ in the `type`
//! discriminator, lifetime, and signing secret. A leaked access secret
//! cannot mint refresh tokens and vice versa.

use encore_core::AuthConfig;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Latest `exp` we mint: 9999-12-31T23:59:59Z
pub const MAX_TIMESTAMP_SECS: u64 = 253_402_300_799;

/// Token kind carried in the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT Claims structure shared by access and refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// JWT ID - joins a refresh token to its persisted record
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Not before timestamp (Unix epoch)
    pub nbf: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// User's email address
    pub email: String,
    /// User's roles at issue time
    pub roles: Vec<String>,
    /// Access or refresh
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl Claims {
    /// Parse the subject as a user id
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }

    /// Check whether the claims list a role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Token is not valid yet")]
    ImmatureToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Unexpected token algorithm")]
    InvalidAlgorithm,

    #[error("Invalid token issuer")]
    InvalidIssuer,

    #[error("Expected {expected} token, got {actual}")]
    WrongTokenType {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token lifetime of {0}s is out of range")]
    LifetimeOutOfRange(u64),

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// JWT Configuration
///
/// Secrets are passed in explicitly; nothing here reads process globals
/// after construction.
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret for access tokens
    pub access_secret: String,
    /// Secret for refresh tokens
    pub refresh_secret: String,
    /// HMAC algorithm; every other algorithm is rejected on verification
    pub algorithm: Algorithm,
    /// Token issuer identifier
    pub issuer: String,
    /// Access token lifetime in seconds (default: 900)
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds (default: 30 days)
    pub refresh_ttl_secs: u64,
    /// Clock skew allowance for exp/nbf
    pub leeway_secs: u64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl JwtConfig {
    /// Config with the given secrets and default lifetimes
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        let defaults = AuthConfig::default();
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            algorithm: Algorithm::HS256,
            issuer: defaults.issuer,
            access_ttl_secs: defaults.access_ttl_secs,
            refresh_ttl_secs: defaults.refresh_ttl_secs,
            leeway_secs: defaults.leeway_secs,
        }
    }

    /// Build from the application auth section
    pub fn from_auth_config(config: &AuthConfig) -> Result<Self, JwtError> {
        Ok(Self {
            access_secret: config.access_secret.clone(),
            refresh_secret: config.refresh_secret.clone(),
            algorithm: parse_hmac_algorithm(&config.algorithm)?,
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_secs: config.refresh_ttl_secs,
            leeway_secs: config.leeway_secs,
        })
    }
}

/// Only HMAC algorithms are accepted for our own tokens
pub fn parse_hmac_algorithm(name: &str) -> Result<Algorithm, JwtError> {
    match name.trim().to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(JwtError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// A freshly minted access/refresh pair
#[derive(Debug, Clone)]
pub struct IssuedPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub access_claims: Claims,
    pub refresh_claims: Claims,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signs and verifies access and refresh tokens
pub struct TokenCodec {
    config: JwtConfig,
    access: KeyPair,
    refresh: KeyPair,
    validation: Validation,
    inspection: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec from explicit configuration
    pub fn new(config: JwtConfig) -> Self {
        let mut validation = Validation::new(config.algorithm);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = config.leeway_secs;

        // Signature, algorithm and issuer only; used to read the jti of
        // refresh tokens that may already be expired
        let mut inspection = Validation::new(config.algorithm);
        inspection.set_issuer(&[&config.issuer]);
        inspection.set_required_spec_claims(&["iss", "sub"]);
        inspection.validate_exp = false;
        inspection.validate_nbf = false;

        Self {
            access: KeyPair::from_secret(&config.access_secret),
            refresh: KeyPair::from_secret(&config.refresh_secret),
            config,
            validation,
            inspection,
        }
    }

    /// Codec configuration
    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Issue an access token and a refresh token for a user
    ///
    /// # Arguments
    ///
    /// * `user_id` - Subject of both tokens
    /// * `email` - Display claim
    /// * `roles` - Roles copied into both tokens
    ///
    /// # Returns
    ///
    /// * `Ok(IssuedPair)` - Encoded tokens plus the claims they carry
    /// * `Err(JwtError)` - If signing fails
    pub fn issue_pair(
        &self,
        user_id: Uuid,
        email: &str,
        roles: &[String],
    ) -> Result<IssuedPair, JwtError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let access_claims = self.claims(TokenType::Access, user_id, email, roles, now)?;
        let refresh_claims = self.claims(TokenType::Refresh, user_id, email, roles, now)?;

        Ok(IssuedPair {
            access_token: self.sign(&access_claims)?,
            refresh_token: self.sign(&refresh_claims)?,
            expires_in: self.config.access_ttl_secs,
            access_claims,
            refresh_claims,
        })
    }

    /// Validate an access token and extract claims
    pub fn verify_access(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenType::Access, &self.validation)
    }

    /// Validate a refresh token and extract claims
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenType::Refresh, &self.validation)
    }

    /// Read a refresh token without checking exp/nbf
    ///
    /// Signature, algorithm, issuer and type are still enforced.
    pub fn inspect_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenType::Refresh, &self.inspection)
    }

    fn claims(
        &self,
        token_type: TokenType,
        user_id: Uuid,
        email: &str,
        roles: &[String],
        now: u64,
    ) -> Result<Claims, JwtError> {
        let ttl = match token_type {
            TokenType::Access => self.config.access_ttl_secs,
            TokenType::Refresh => self.config.refresh_ttl_secs,
        };
        let exp = now
            .checked_add(ttl)
            .filter(|exp| *exp <= MAX_TIMESTAMP_SECS)
            .ok_or(JwtError::LifetimeOutOfRange(ttl))?;

        Ok(Claims {
            iss: self.config.issuer.clone(),
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp,
            email: email.to_string(),
            roles: roles.to_vec(),
            token_type,
        })
    }

    fn keys(&self, token_type: TokenType) -> &KeyPair {
        match token_type {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        let token = encode(
            &Header::new(self.config.algorithm),
            claims,
            &self.keys(claims.token_type).encoding,
        )?;
        Ok(token)
    }

    fn verify(
        &self,
        token: &str,
        expected: TokenType,
        validation: &Validation,
    ) -> Result<Claims, JwtError> {
        let token_data = decode::<Claims>(token, &self.keys(expected).decoding, validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
                ErrorKind::ImmatureSignature => JwtError::ImmatureToken,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => JwtError::InvalidAlgorithm,
                ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
                _ => JwtError::InvalidToken,
            })?;

        let claims = token_data.claims;
        if claims.token_type != expected {
            return Err(JwtError::WrongTokenType {
                expected,
                actual: claims.token_type,
            });
        }

        Ok(claims)
    }
}

/// Extract a token from an Authorization header value
///
/// Accepts `Bearer <token>` (scheme case-insensitive) or a bare token with
/// exactly two `.` separators and no whitespace.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let parts: Vec<&str> = header.split_whitespace().collect();

    match parts.as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") => Some(*token),
        [token] if token.len() == header.len() && token.matches('.').count() == 2 => Some(*token),
        _ => None,
    }
}
