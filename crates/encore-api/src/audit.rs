//! Security audit logging for authentication events
//!
//! Provides structured audit logging for session lifecycle events:
//! registrations, logins, refreshes, logouts, and revocations.
//!
//! Events are logged with the "audit" target so they can be filtered and
//! routed separately from application logs. Routine events go out at INFO;
//! events that indicate possible token theft go out at WARN.
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// How a user proved their identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    Password,
    Google,
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful user registration
    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed registration attempt
    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// Successful login
    LoginSuccess {
        user_id: Uuid,
        email: String,
        method: LoginMethod,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed login attempt; the reason never reaches the client
    LoginFailure {
        email: Option<String>,
        method: LoginMethod,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token rotated
    TokenRefresh {
        user_id: Uuid,
        old_token_id: String,
        new_token_id: String,
        ip_address: Option<String>,
    },

    /// A rotated refresh token was presented again
    TokenReuseDetected {
        user_id: Uuid,
        token_id: String,
        replaced_by: Option<String>,
        sessions_revoked: u64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token revoked by its holder
    Logout {
        user_id: Uuid,
        token_id: String,
        ip_address: Option<String>,
    },

    /// Every session of a user revoked
    SessionsRevoked {
        user_id: Uuid,
        revoked_by: Option<Uuid>,
        count: u64,
    },

    /// Access denied due to insufficient role
    AccessDenied {
        user_id: Uuid,
        resource: String,
        required_role: String,
    },

    /// Expired refresh records deleted
    PurgeCompleted { deleted: u64 },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::TokenReuseDetected { .. } => "Refresh token reuse detected",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::SessionsRevoked { .. } => "Sessions revoked",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::PurgeCompleted { .. } => "Expired refresh tokens purged",
        }
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::TokenReuseDetected { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::SessionsRevoked { user_id, .. }
            | AuditEvent::AccessDenied { user_id, .. } => Some(*user_id),
            AuditEvent::RegistrationFailure { .. }
            | AuditEvent::LoginFailure { .. }
            | AuditEvent::PurgeCompleted { .. } => None,
        }
    }

    /// Events that point at a possible compromise
    pub fn is_alert(&self) -> bool {
        matches!(self, AuditEvent::TokenReuseDetected { .. })
    }
}

/// Log a security audit event with structured fields
///
/// # Structured Logging
///
/// The event is serialized to JSON for log aggregators:
///
/// ```json
/// {
///   "event_type": "login_success",
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "email": "user@example.com",
///   "method": "password",
///   "ip_address": "192.168.1.1",
///   "user_agent": "Mozilla/5.0..."
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let user_id = event.user_id();

    if event.is_alert() {
        warn!(
            target: "audit",
            event = %event_json,
            user_id = ?user_id,
            "{}",
            event.summary()
        );
    } else {
        info!(
            target: "audit",
            event = %event_json,
            user_id = ?user_id,
            "{}",
            event.summary()
        );
    }
}

/// Request metadata recorded on refresh tokens and audit events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Extract IP address from request headers
///
/// Checks X-Forwarded-For, then X-Real-IP.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    // Check X-Forwarded-For (proxy/load balancer)
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            // Take the first IP in the chain (client IP)
            if let Some(first_ip) = xff_str.split(',').next().map(str::trim) {
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    // Check X-Real-IP (nginx proxy)
    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            method: LoginMethod::Google,
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"login_success\""));
        assert!(json.contains("\"method\":\"google\""));
        assert!(json.contains("test@example.com"));
    }

    #[test]
    fn test_reuse_is_alert() {
        let event = AuditEvent::TokenReuseDetected {
            user_id: Uuid::new_v4(),
            token_id: "old".to_string(),
            replaced_by: Some("new".to_string()),
            sessions_revoked: 0,
            ip_address: None,
            user_agent: None,
        };
        assert!(event.is_alert());
        assert!(!AuditEvent::PurgeCompleted { deleted: 1 }.is_alert());

        // Must not panic
        audit_log(&event);
    }

    #[test]
    fn test_audit_log_login_failure() {
        audit_log(&AuditEvent::LoginFailure {
            email: Some("test@example.com".to_string()),
            method: LoginMethod::Password,
            reason: "unknown email".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Test Agent".to_string()),
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_client_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "Mozilla/5.0 (Test)".parse().unwrap(),
        );

        let ctx = ClientContext::from_headers(&headers);
        assert_eq!(ctx.user_agent.as_deref(), Some("Mozilla/5.0 (Test)"));
        assert_eq!(ctx.ip_address, None);
        assert_eq!(ClientContext::from_headers(&HeaderMap::new()), ClientContext::default());
    }
}
