//! Encore Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with defaults suitable for local development. Signing secrets have
//! no defaults and must always be supplied.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Signing algorithms accepted for access and refresh tokens
pub const SUPPORTED_ALGORITHMS: [&str; 3] = ["HS256", "HS384", "HS512"];

/// Upper bound for access and refresh token lifetimes (10 years)
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Upper bound for exp/nbf clock skew allowance
pub const MAX_LEEWAY_SECS: u64 = 3600;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Token and password settings
    pub auth: AuthConfig,

    /// Google identity provider
    pub google: GoogleConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Load from an optional file, apply env overrides, then validate
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?.with_env_override()?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Only variables that are present are applied; everything else keeps
    /// its current value.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("SERVER_HOST") {
            self.server.host = host;
        }
        parse_into(&lookup, "SERVER_PORT", &mut self.server.port)?;
        parse_into(
            &lookup,
            "SERVER_REQUEST_TIMEOUT_SECS",
            &mut self.server.request_timeout_secs,
        )?;
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // PostgreSQL
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url).filter(|u| !u.trim().is_empty());
        }
        parse_into(
            &lookup,
            "DATABASE_MAX_CONNECTIONS",
            &mut self.database.max_connections,
        )?;

        // Tokens
        if let Some(secret) = lookup("JWT_ACCESS_SECRET") {
            self.auth.access_secret = secret;
        }
        if let Some(secret) = lookup("JWT_REFRESH_SECRET") {
            self.auth.refresh_secret = secret;
        }
        if let Some(alg) = lookup("JWT_ALGORITHM") {
            self.auth.algorithm = alg.trim().to_uppercase();
        }
        if let Some(issuer) = lookup("JWT_ISSUER") {
            self.auth.issuer = issuer;
        }
        parse_into(&lookup, "JWT_ACCESS_TTL_SECS", &mut self.auth.access_ttl_secs)?;
        parse_into(&lookup, "JWT_REFRESH_TTL_SECS", &mut self.auth.refresh_ttl_secs)?;
        parse_into(&lookup, "JWT_LEEWAY_SECS", &mut self.auth.leeway_secs)?;
        parse_into(
            &lookup,
            "AUTH_PURGE_INTERVAL_SECS",
            &mut self.auth.purge_interval_secs,
        )?;
        parse_into(
            &lookup,
            "AUTH_REVOKE_ALL_ON_REUSE",
            &mut self.auth.revoke_all_on_reuse,
        )?;

        // Argon2
        parse_into(&lookup, "ARGON2_MEMORY_KIB", &mut self.auth.argon2.memory_kib)?;
        parse_into(&lookup, "ARGON2_TIME_COST", &mut self.auth.argon2.time_cost)?;
        parse_into(
            &lookup,
            "ARGON2_PARALLELISM",
            &mut self.auth.argon2.parallelism,
        )?;
        parse_into(&lookup, "ARGON2_OUTPUT_LEN", &mut self.auth.argon2.output_len)?;

        // Google
        if let Some(client_id) = lookup("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(client_id).filter(|c| !c.trim().is_empty());
        }
        if let Some(url) = lookup("GOOGLE_CERTS_URL") {
            self.google.certs_url = url;
        }
        parse_into(
            &lookup,
            "GOOGLE_JWKS_CACHE_SECS",
            &mut self.google.jwks_cache_secs,
        )?;

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(())
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DATABASE_MAX_CONNECTIONS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        })?;
    }
    Ok(())
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            // Empty by default - set via CORS_ORIGINS env var
            cors_origins: vec![],
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; in-memory storage is used when unset
    pub url: Option<String>,

    /// Connection pool size
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Token signing and session settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret for access tokens
    pub access_secret: String,

    /// Secret for refresh tokens, must differ from the access secret
    pub refresh_secret: String,

    /// HMAC algorithm name (HS256, HS384, HS512)
    pub algorithm: String,

    /// `iss` claim written into and required on every token
    pub issuer: String,

    /// Access token lifetime in seconds
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: u64,

    /// Clock skew tolerated on exp/nbf, in seconds
    pub leeway_secs: u64,

    /// Interval of the expired-record purge task; 0 disables it
    pub purge_interval_secs: u64,

    /// Revoke every session of a user when a rotated token is replayed
    pub revoke_all_on_reuse: bool,

    /// Password hashing parameters for new hashes
    pub argon2: Argon2Config,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            algorithm: "HS256".to_string(),
            issuer: "encore-auth".to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 720 * 60 * 60,
            leeway_secs: 30,
            purge_interval_secs: 3600,
            revoke_all_on_reuse: false,
            argon2: Argon2Config::default(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_secret", &"[redacted]")
            .field("refresh_secret", &"[redacted]")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("purge_interval_secs", &self.purge_interval_secs)
            .field("revoke_all_on_reuse", &self.revoke_all_on_reuse)
            .field("argon2", &self.argon2)
            .finish()
    }
}

impl AuthConfig {
    /// Validate secrets, algorithm, and lifetimes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_ACCESS_SECRET".to_string()));
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired(
                "JWT_REFRESH_SECRET".to_string(),
            ));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_SECRET".to_string(),
                value: "must differ from JWT_ACCESS_SECRET".to_string(),
            });
        }
        let algorithm = self.algorithm.trim().to_uppercase();
        if !SUPPORTED_ALGORITHMS.contains(&algorithm.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ALGORITHM".to_string(),
                value: self.algorithm.clone(),
            });
        }
        if self.access_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ACCESS_TTL_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.refresh_ttl_secs <= self.access_ttl_secs
            || self.refresh_ttl_secs > MAX_TOKEN_TTL_SECS
        {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_TTL_SECS".to_string(),
                value: self.refresh_ttl_secs.to_string(),
            });
        }
        if self.leeway_secs > MAX_LEEWAY_SECS {
            return Err(ConfigError::InvalidValue {
                key: "JWT_LEEWAY_SECS".to_string(),
                value: self.leeway_secs.to_string(),
            });
        }

        self.argon2.validate()
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Argon2Config {
    /// Memory cost in KiB
    pub memory_kib: u32,

    /// Number of passes
    pub time_cost: u32,

    /// Degree of parallelism
    pub parallelism: u32,

    /// Derived key length in bytes
    pub output_len: usize,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 2,
            output_len: 32,
        }
    }
}

impl Argon2Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ARGON2_PARALLELISM".to_string(),
                value: "0".to_string(),
            });
        }
        // Argon2 requires at least 8 KiB per lane
        let min_memory = self.parallelism.checked_mul(8);
        if min_memory.map_or(true, |min| self.memory_kib < min) {
            return Err(ConfigError::InvalidValue {
                key: "ARGON2_MEMORY_KIB".to_string(),
                value: self.memory_kib.to_string(),
            });
        }
        if self.time_cost == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ARGON2_TIME_COST".to_string(),
                value: "0".to_string(),
            });
        }
        if self.output_len < 16 {
            return Err(ConfigError::InvalidValue {
                key: "ARGON2_OUTPUT_LEN".to_string(),
                value: self.output_len.to_string(),
            });
        }
        Ok(())
    }
}

/// Google identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// OAuth client id expected in the `aud` claim; identity login is off when unset
    pub client_id: Option<String>,

    /// JWKS endpoint
    pub certs_url: String,

    /// How long fetched keys are trusted before refetching
    pub jwks_cache_secs: u64,

    /// Timeout for the JWKS request
    pub request_timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            certs_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
            jwks_cache_secs: 3600,
            request_timeout_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with_secrets() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.access_secret = "access-secret".to_string();
        config.auth.refresh_secret = "refresh-secret".to_string();
        config
    }

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.access_ttl_secs, 900);
        assert_eq!(config.auth.refresh_ttl_secs, 2_592_000);
        assert_eq!(config.auth.algorithm, "HS256");
        assert_eq!(config.auth.argon2.memory_kib, 65536);
        assert!(config.database.url.is_none());
        assert!(!config.auth.revoke_all_on_reuse);
    }

    #[test]
    fn test_default_requires_secrets() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(key) if key == "JWT_ACCESS_SECRET"));
    }

    #[test]
    fn test_secrets_must_differ() {
        let mut config = with_secrets();
        config.auth.refresh_secret = config.auth.access_secret.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "JWT_REFRESH_SECRET"
        ));
    }

    #[test]
    fn test_rejects_asymmetric_algorithm() {
        let mut config = with_secrets();
        config.auth.algorithm = "RS256".to_string();
        assert!(config.validate().is_err());

        config.auth.algorithm = "HS512".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refresh_ttl_must_exceed_access_ttl() {
        let mut config = with_secrets();
        config.auth.refresh_ttl_secs = config.auth.access_ttl_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_lifetimes_are_bounded() {
        let mut config = with_secrets();
        config.auth.refresh_ttl_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "JWT_REFRESH_TTL_SECS"
        ));

        config.auth.refresh_ttl_secs = 100_000_000_000_000_000;
        assert!(config.validate().is_err());

        config.auth.refresh_ttl_secs = MAX_TOKEN_TTL_SECS;
        assert!(config.validate().is_ok());

        config.auth.leeway_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "JWT_LEEWAY_SECS"
        ));
    }

    #[test]
    fn test_argon2_parallelism_overflow() {
        let mut config = with_secrets();
        config.auth.argon2.parallelism = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "ARGON2_MEMORY_KIB"
        ));
    }

    #[test]
    fn test_algorithm_case_insensitive() {
        let config: AppConfig = toml::from_str(
            r#"
            [auth]
            access_secret = "x"
            refresh_secret = "y"
            algorithm = "hs256"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env_with(lookup_from(&[
                ("SERVER_PORT", "9090"),
                ("JWT_ACCESS_SECRET", "a"),
                ("JWT_REFRESH_SECRET", "b"),
                ("JWT_ALGORITHM", "hs384"),
                ("JWT_ACCESS_TTL_SECS", "60"),
                ("AUTH_REVOKE_ALL_ON_REUSE", "true"),
                ("ARGON2_MEMORY_KIB", "19456"),
                ("GOOGLE_CLIENT_ID", "client.apps.googleusercontent.com"),
                ("LOG_FORMAT", "JSON"),
                ("CORS_ORIGINS", "http://a.test, ,http://b.test"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.auth.algorithm, "HS384");
        assert_eq!(config.auth.access_ttl_secs, 60);
        assert!(config.auth.revoke_all_on_reuse);
        assert_eq!(config.auth.argon2.memory_kib, 19456);
        assert_eq!(
            config.google.client_id.as_deref(),
            Some("client.apps.googleusercontent.com")
        );
        assert!(config.logging.json_format);
        assert_eq!(config.server.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_with(lookup_from(&[("JWT_REFRESH_TTL_SECS", "forever")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "JWT_REFRESH_TTL_SECS"));
    }

    #[test]
    fn test_empty_database_url_means_memory() {
        let mut config = AppConfig::default();
        config
            .apply_env_with(lookup_from(&[("DATABASE_URL", "  ")]))
            .unwrap();
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 3000

            [auth]
            access_secret = "x"
            refresh_secret = "y"

            [auth.argon2]
            time_cost = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.argon2.time_cost, 2);
        assert_eq!(config.auth.argon2.memory_kib, 65536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = with_secrets();
        let printed = format!("{:?}", config.auth);
        assert!(!printed.contains("access-secret"));
        assert!(printed.contains("[redacted]"));
    }
}
