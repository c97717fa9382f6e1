//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{
    init_schema, GoogleIdentityVerifier, JwtConfig, MemoryRefreshTokenStore,
    MemoryUserRepository, PasswordHasher, PgRefreshTokenStore, PgUserRepository,
    RefreshTokenStore, SessionService, TokenCodec, UserRepository,
};
use anyhow::Context;
use encore_core::AppConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Session orchestration
    pub sessions: Arc<SessionService>,
    /// Refresh token store, shared with the purge task
    pub tokens: Arc<dyn RefreshTokenStore>,
    /// Database pool; `None` when running on in-memory stores
    pub db_pool: Option<PgPool>,
    /// Server start time
    pub start_time: Instant,
    /// Ready status
    pub is_ready: AtomicBool,
}

impl AppState {
    /// Build state from configuration
    ///
    /// Connects to PostgreSQL and applies the schema when `database.url` is
    /// set, otherwise falls back to in-memory stores.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let Some(url) = config.database.url.clone() else {
            tracing::warn!("DATABASE_URL not set, sessions are kept in memory only");
            return Self::in_memory(config);
        };

        let pool = connect(&config, &url).await?;
        init_schema(&pool)
            .await
            .context("failed to initialize database schema")?;

        let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(pool.clone()));
        let tokens: Arc<dyn RefreshTokenStore> = Arc::new(PgRefreshTokenStore::new(pool.clone()));

        Self::assemble(config, users, tokens, Some(pool))
    }

    /// Build state on in-memory stores
    pub fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        let users: Arc<dyn UserRepository> = Arc::new(MemoryUserRepository::new());
        let tokens: Arc<dyn RefreshTokenStore> = Arc::new(MemoryRefreshTokenStore::new());
        Self::assemble(config, users, tokens, None)
    }

    fn assemble(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn RefreshTokenStore>,
        db_pool: Option<PgPool>,
    ) -> anyhow::Result<Self> {
        let codec = TokenCodec::new(
            JwtConfig::from_auth_config(&config.auth).context("invalid token configuration")?,
        );
        let hasher = PasswordHasher::new(config.auth.argon2.into())
            .context("invalid Argon2 configuration")?;

        let mut sessions =
            SessionService::new(users, tokens.clone(), Arc::new(codec), Arc::new(hasher))
                .with_revoke_all_on_reuse(config.auth.revoke_all_on_reuse);

        if config.google.client_id.is_some() {
            let verifier = GoogleIdentityVerifier::new(&config.google)
                .context("failed to initialize Google identity verifier")?;
            sessions = sessions.with_identity_verifier(Arc::new(verifier));
        } else {
            tracing::info!("GOOGLE_CLIENT_ID not set, Google sign-in disabled");
        }

        Ok(Self {
            config,
            sessions: Arc::new(sessions),
            tokens,
            db_pool,
            start_time: Instant::now(),
            is_ready: AtomicBool::new(true),
        })
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }

    /// Ping the database; always true on in-memory stores
    pub async fn database_reachable(&self) -> bool {
        match &self.db_pool {
            Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            None => true,
        }
    }
}

/// Open a PostgreSQL pool from configuration
pub async fn connect(config: &AppConfig, url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(url)
        .await
        .context("failed to connect to database")
}
