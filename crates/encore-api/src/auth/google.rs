//! Google ID token verification
//!
//! Validates RS256 ID tokens against Google's published JWKS, the configured
//! client id (audience), and Google's canonical issuers. Keys are cached with
//! moka and refetched when a token names a key id we have not seen.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use encore_core::GoogleConfig;
use jsonwebtoken::{
    decode, decode_header, errors::ErrorKind, jwk::JwkSet, Algorithm, DecodingKey, Validation,
};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Issuer strings Google uses in ID tokens
pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

const JWKS_CACHE_KEY: &str = "google";

/// Minimum spacing between forced refetches caused by unknown key ids
const MIN_FORCED_REFETCH: Duration = Duration::from_secs(60);

/// Identity extracted from a verified assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Provider's stable subject id
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Identity assertion errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity provider is not configured")]
    NotConfigured,

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("Invalid identity token signature")]
    InvalidSignature,

    #[error("Identity token has expired")]
    Expired,

    #[error("Invalid identity token issuer")]
    InvalidIssuer,

    #[error("Identity token audience mismatch")]
    InvalidAudience,

    #[error("Email address is not verified")]
    EmailNotVerified,

    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    #[error("Failed to fetch signing keys: {0}")]
    KeyFetch(String),
}

/// Verifies externally issued identity assertions
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify an assertion and return the identity it vouches for
    async fn verify(&self, assertion: &str) -> Result<ExternalIdentity, IdentityError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexibleBool {
    Bool(bool),
    Text(String),
}

impl FlexibleBool {
    fn is_true(&self) -> bool {
        match self {
            FlexibleBool::Bool(b) => *b,
            FlexibleBool::Text(s) => s.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<FlexibleBool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

enum KeySource {
    Static(Arc<JwkSet>),
    Remote {
        client: Client,
        url: String,
        cache: Cache<&'static str, Arc<JwkSet>>,
        last_forced: Mutex<Option<Instant>>,
    },
}

/// Google Sign-In verifier
pub struct GoogleIdentityVerifier {
    client_id: String,
    keys: KeySource,
}

impl GoogleIdentityVerifier {
    /// Create a verifier that fetches keys from `config.certs_url`
    pub fn new(config: &GoogleConfig) -> Result<Self, IdentityError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or(IdentityError::NotConfigured)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))?;

        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(config.jwks_cache_secs))
            .build();

        Ok(Self {
            client_id,
            keys: KeySource::Remote {
                client,
                url: config.certs_url.clone(),
                cache,
                last_forced: Mutex::new(None),
            },
        })
    }

    /// Create a verifier with a fixed key set
    pub fn with_static_keys(client_id: impl Into<String>, keys: JwkSet) -> Self {
        Self {
            client_id: client_id.into(),
            keys: KeySource::Static(Arc::new(keys)),
        }
    }

    async fn key_set(&self, force: bool) -> Result<Arc<JwkSet>, IdentityError> {
        match &self.keys {
            KeySource::Static(set) => Ok(set.clone()),
            KeySource::Remote {
                client,
                url,
                cache,
                last_forced,
            } => {
                if force {
                    let mut last = last_forced.lock().await;
                    let due = last.map_or(true, |at| at.elapsed() >= MIN_FORCED_REFETCH);
                    if due {
                        *last = Some(Instant::now());
                        cache.invalidate(JWKS_CACHE_KEY).await;
                    }
                }

                cache
                    .try_get_with(JWKS_CACHE_KEY, fetch_jwks(client, url))
                    .await
                    .map_err(|e| match e.as_ref() {
                        IdentityError::KeyFetch(msg) => IdentityError::KeyFetch(msg.clone()),
                        other => IdentityError::KeyFetch(other.to_string()),
                    })
            }
        }
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        let mut keys = self.key_set(false).await?;
        if keys.find(kid).is_none() {
            tracing::debug!(kid, "Unknown Google key id, refetching JWKS");
            keys = self.key_set(true).await?;
        }

        let jwk = keys
            .find(kid)
            .ok_or_else(|| IdentityError::UnknownKey(kid.to_string()))?;

        DecodingKey::from_jwk(jwk).map_err(|e| IdentityError::InvalidToken(e.to_string()))
    }
}

async fn fetch_jwks(client: &Client, url: &str) -> Result<Arc<JwkSet>, IdentityError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| IdentityError::KeyFetch(format!("Request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(IdentityError::KeyFetch(format!(
            "JWKS endpoint returned {}",
            response.status()
        )));
    }

    let set: JwkSet = response
        .json()
        .await
        .map_err(|e| IdentityError::KeyFetch(format!("Failed to parse JWKS: {e}")))?;

    tracing::info!(keys = set.keys.len(), "Fetched Google signing keys");
    Ok(Arc::new(set))
}

#[async_trait]
impl IdentityVerifier for GoogleIdentityVerifier {
    async fn verify(&self, assertion: &str) -> Result<ExternalIdentity, IdentityError> {
        let header =
            decode_header(assertion).map_err(|e| IdentityError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidToken("missing key id".to_string()))?;

        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = decode::<GoogleClaims>(assertion, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => IdentityError::Expired,
                ErrorKind::InvalidSignature => IdentityError::InvalidSignature,
                ErrorKind::InvalidIssuer => IdentityError::InvalidIssuer,
                ErrorKind::InvalidAudience => IdentityError::InvalidAudience,
                _ => IdentityError::InvalidToken(e.to_string()),
            })?
            .claims;

        if let Some(verified) = &claims.email_verified {
            if !verified.is_true() {
                return Err(IdentityError::EmailNotVerified);
            }
        }

        let email = claims
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| IdentityError::InvalidToken("missing email claim".to_string()))?;

        Ok(ExternalIdentity {
            subject: claims.sub,
            email,
            display_name: claims.name.filter(|n| !n.is_empty()),
            avatar_url: claims.picture.filter(|p| !p.is_empty()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub(crate) const CLIENT_ID: &str = "encore-test.apps.googleusercontent.com";
    const KID: &str = "encore-test-key";
    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/google_test_rsa.pem");
    const JWKS: &str = include_str!("../../tests/fixtures/google_jwks.json");

    pub(crate) fn test_verifier() -> GoogleIdentityVerifier {
        let keys: JwkSet = serde_json::from_str(JWKS).unwrap();
        GoogleIdentityVerifier::with_static_keys(CLIENT_ID, keys)
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    pub(crate) fn claims_for(sub: &str, email: &str) -> Value {
        json!({
            "iss": "https://accounts.google.com",
            "aud": CLIENT_ID,
            "sub": sub,
            "email": email,
            "email_verified": true,
            "name": "Alice Liddell",
            "picture": "https://example.com/alice.png",
            "iat": now(),
            "exp": now() + 600,
        })
    }

    pub(crate) fn sign(claims: &Value) -> String {
        sign_with_kid(claims, KID)
    }

    fn sign_with_kid(claims: &Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_assertion() {
        let token = sign(&claims_for("10769150350006150715113082367", "alice@example.com"));

        let identity = test_verifier().verify(&token).await.unwrap();
        assert_eq!(identity.subject, "10769150350006150715113082367");
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.display_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(
            identity.avatar_url.as_deref(),
            Some("https://example.com/alice.png")
        );
    }

    #[tokio::test]
    async fn test_short_issuer_accepted() {
        let mut claims = claims_for("1", "a@example.com");
        claims["iss"] = json!("accounts.google.com");

        assert!(test_verifier().verify(&sign(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_foreign_issuer_rejected() {
        let mut claims = claims_for("1", "a@example.com");
        claims["iss"] = json!("https://evil.example.com");

        assert!(matches!(
            test_verifier().verify(&sign(&claims)).await,
            Err(IdentityError::InvalidIssuer)
        ));
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let mut claims = claims_for("1", "a@example.com");
        claims["aud"] = json!("someone-else.apps.googleusercontent.com");

        assert!(matches!(
            test_verifier().verify(&sign(&claims)).await,
            Err(IdentityError::InvalidAudience)
        ));
    }

    #[tokio::test]
    async fn test_expired_rejected() {
        let mut claims = claims_for("1", "a@example.com");
        claims["iat"] = json!(now() - 7200);
        claims["exp"] = json!(now() - 3600);

        assert!(matches!(
            test_verifier().verify(&sign(&claims)).await,
            Err(IdentityError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_unverified_email_rejected() {
        let mut claims = claims_for("1", "a@example.com");
        claims["email_verified"] = json!(false);
        assert!(matches!(
            test_verifier().verify(&sign(&claims)).await,
            Err(IdentityError::EmailNotVerified)
        ));

        claims["email_verified"] = json!("false");
        assert!(matches!(
            test_verifier().verify(&sign(&claims)).await,
            Err(IdentityError::EmailNotVerified)
        ));
    }

    #[tokio::test]
    async fn test_email_verified_as_string() {
        let mut claims = claims_for("1", "a@example.com");
        claims["email_verified"] = json!("true");

        assert!(test_verifier().verify(&sign(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_absent_email_verified_accepted() {
        let mut claims = claims_for("1", "a@example.com");
        claims.as_object_mut().unwrap().remove("email_verified");

        assert!(test_verifier().verify(&sign(&claims)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_email_rejected() {
        let mut claims = claims_for("1", "a@example.com");
        claims.as_object_mut().unwrap().remove("email");

        assert!(matches!(
            test_verifier().verify(&sign(&claims)).await,
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_key_id() {
        let token = sign_with_kid(&claims_for("1", "a@example.com"), "rotated-away");

        assert!(matches!(
            test_verifier().verify(&token).await,
            Err(IdentityError::UnknownKey(kid)) if kid == "rotated-away"
        ));
    }

    #[tokio::test]
    async fn test_hmac_token_rejected() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(KID.to_string());
        let token = encode(
            &header,
            &claims_for("1", "a@example.com"),
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        assert!(matches!(
            test_verifier().verify(&token).await,
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        assert!(test_verifier().verify("not-a-jwt").await.is_err());
    }

    #[test]
    fn test_requires_client_id() {
        let config = GoogleConfig::default();
        assert!(matches!(
            GoogleIdentityVerifier::new(&config),
            Err(IdentityError::NotConfigured)
        ));
    }
}
