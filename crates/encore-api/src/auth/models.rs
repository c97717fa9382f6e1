//! Database models for authentication
//!
//! This module defines the records the auth subsystem reads and writes:
//! - User: credential identity (password and/or Google account)
//! - RefreshTokenRecord: persisted state of an issued refresh token
//!
//! These map to the `users` and `refresh_tokens` PostgreSQL tables.

use super::google::ExternalIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Role granted to every new account
pub const DEFAULT_ROLE: &str = "user";

/// Role allowed to revoke other users' sessions
pub const ADMIN_ROLE: &str = "admin";

/// User account model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,

    /// Normalized (trimmed, lowercase) email address
    pub email: String,

    /// Argon2id PHC string; absent for accounts created through Google
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    pub display_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,

    /// Google subject id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,

    pub roles: Vec<String>,

    pub is_active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a password account
    pub fn new_local(email: String, password_hash: String, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: Some(password_hash),
            display_name,
            photo_url: None,
            google_id: None,
            roles: vec![DEFAULT_ROLE.to_string()],
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an account from a verified Google identity
    pub fn new_external(identity: &ExternalIdentity) -> Self {
        let now = Utc::now();
        let email = normalize_email(&identity.email);
        let display_name = identity
            .display_name
            .clone()
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: None,
            display_name,
            photo_url: identity.avatar_url.clone(),
            google_id: Some(identity.subject.clone()),
            roles: vec![DEFAULT_ROLE.to_string()],
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Convert user to public representation (without sensitive fields)
    pub fn to_info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
            roles: self.roles.clone(),
            created_at: self.created_at,
        }
    }
}

/// Public user representation (safe for API responses)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Trim and lowercase an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Persisted refresh token state
///
/// Joined to the token by `token_id` (the JWT `jti`). A record only ever
/// moves from active to revoked; `replaced_by` is set when a rotation
/// revoked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,

    pub user_id: Uuid,

    /// JWT ID of the refresh token (unique)
    pub token_id: String,

    pub issued_at: DateTime<Utc>,

    /// Equal to the token's `exp` claim
    pub expires_at: DateTime<Utc>,

    pub revoked: bool,

    /// `jti` of the token issued in the rotation that revoked this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Create an active record
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the token
    /// * `token_id` - The token's `jti`
    /// * `issued_at` - The token's `iat`
    /// * `expires_at` - The token's `exp`
    /// * `user_agent` - Client user agent (optional)
    /// * `ip_address` - Client IP address (optional)
    pub fn new(
        user_id: Uuid,
        token_id: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_id,
            issued_at,
            expires_at,
            revoked: false,
            replaced_by: None,
            user_agent,
            ip_address,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the token is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if the token is valid at `now` (not expired and not revoked)
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Revoked by a rotation rather than by logout or revoke-all
    pub fn is_rotated(&self) -> bool {
        self.revoked && self.replaced_by.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_in: Duration) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord::new(
            Uuid::new_v4(),
            Uuid::new_v4().to_string(),
            now,
            now + expires_in,
            Some("test-agent".to_string()),
            Some("127.0.0.1".to_string()),
        )
    }

    #[test]
    fn test_local_user_defaults() {
        let user = User::new_local(
            "alice@example.com".to_string(),
            "$argon2id$...".to_string(),
            "Alice".to_string(),
        );

        assert!(user.is_active);
        assert_eq!(user.roles, vec!["user"]);
        assert!(user.has_role(DEFAULT_ROLE));
        assert!(!user.has_role(ADMIN_ROLE));
        assert!(user.google_id.is_none());
    }

    #[test]
    fn test_external_user() {
        let identity = ExternalIdentity {
            subject: "google-sub-1".to_string(),
            email: " Bob@Example.COM ".to_string(),
            display_name: None,
            avatar_url: Some("https://example.com/bob.png".to_string()),
        };

        let user = User::new_external(&identity);
        assert_eq!(user.email, "bob@example.com");
        assert_eq!(user.display_name, "bob");
        assert_eq!(user.google_id.as_deref(), Some("google-sub-1"));
        assert!(user.password_hash.is_none());
    }

    #[test]
    fn test_user_serialization_hides_hash() {
        let user = User::new_local(
            "a@example.com".to_string(),
            "secret_hash".to_string(),
            "A".to_string(),
        );

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret_hash"));

        let info = serde_json::to_string(&user.to_info()).unwrap();
        assert!(!info.contains("password"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.com\n"), "alice@example.com");
    }

    #[test]
    fn test_refresh_record_validity() {
        let now = Utc::now();
        let mut token = record(Duration::days(7));

        assert!(token.is_valid());
        assert!(!token.is_expired());
        assert!(!token.is_rotated());

        // Expired token
        token.expires_at = now - Duration::seconds(1);
        assert!(!token.is_valid());
        assert!(token.is_expired());

        // Boundary: expiry instant is no longer valid
        token.expires_at = now;
        assert!(!token.is_valid_at(now));

        // Revoked token
        token.expires_at = now + Duration::days(7);
        token.revoked = true;
        assert!(!token.is_valid());
        assert!(!token.is_rotated());

        token.replaced_by = Some("next".to_string());
        assert!(token.is_rotated());
    }
}
