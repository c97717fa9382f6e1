//! Authentication repositories
//!
//! This module provides the storage layer for authentication entities:
//! - User lookup, creation, and Google account provisioning
//! - Refresh token records (create, lookup, revoke, rotate, purge)
//!
//! Each store is a trait with a PostgreSQL implementation (sqlx) and an
//! in-memory implementation used in tests and local development.

use super::google::ExternalIdentity;
use super::models::{normalize_email, RefreshTokenRecord, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Duplicate token id")]
    DuplicateTokenId,
}

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::DatabaseError(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Schema for the auth tables
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT,
        display_name TEXT NOT NULL,
        photo_url TEXT,
        google_id TEXT UNIQUE,
        roles TEXT[] NOT NULL DEFAULT ARRAY['user']::TEXT[],
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_login_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        token_id TEXT NOT NULL,
        issued_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked BOOLEAN NOT NULL DEFAULT FALSE,
        replaced_by TEXT,
        user_agent TEXT,
        ip_address TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_refresh_tokens_token_id ON refresh_tokens (token_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user_id ON refresh_tokens (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires_at ON refresh_tokens (expires_at)",
];

/// Create the auth tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), RepositoryError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(db_err)?;
    }
    tracing::info!("Auth schema initialized");
    Ok(())
}

// ============================================================================
// Users
// ============================================================================

/// User lookup and provisioning
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Find by Google subject id
    async fn find_by_external_id(&self, subject: &str) -> Result<Option<User>, RepositoryError>;

    /// Insert a new user; fails with `EmailAlreadyExists` on a taken email
    async fn create(&self, user: &User) -> Result<(), RepositoryError>;

    /// Return the user linked to `identity.subject`, creating it if needed
    ///
    /// Fills in display name and photo on an existing user when those are
    /// empty. Fails with `EmailAlreadyExists` if a different account already
    /// owns the email.
    async fn upsert_external(&self, identity: &ExternalIdentity) -> Result<User, RepositoryError>;

    /// Record a successful login
    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError>;
}

const USER_COLUMNS: &str = "id, email, password_hash, display_name, photo_url, google_id, roles, \
                            is_active, last_login_at, created_at, updated_at";

/// PostgreSQL user repository
#[derive(Debug, Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_by_external_id(&self, subject: &str) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE google_id = $1"
        ))
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, photo_url, google_id,
                               roles, is_active, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.photo_url)
        .bind(&user.google_id)
        .bind(&user.roles)
        .bind(user.is_active)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::EmailAlreadyExists
            } else {
                db_err(e)
            }
        })?;

        Ok(())
    }

    async fn upsert_external(&self, identity: &ExternalIdentity) -> Result<User, RepositoryError> {
        let candidate = User::new_external(identity);

        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, photo_url, google_id,
                               roles, is_active, created_at, updated_at)
            VALUES ($1, $2, NULL, $3, $4, $5, $6, TRUE, NOW(), NOW())
            ON CONFLICT (google_id) DO UPDATE SET
                display_name = CASE WHEN users.display_name = '' THEN EXCLUDED.display_name
                                    ELSE users.display_name END,
                photo_url = COALESCE(users.photo_url, EXCLUDED.photo_url),
                updated_at = NOW()
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(candidate.id)
        .bind(&candidate.email)
        .bind(&candidate.display_name)
        .bind(&candidate.photo_url)
        .bind(&candidate.google_id)
        .bind(&candidate.roles)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // google_id conflicts are absorbed above; what remains is the email
            if is_unique_violation(&e) {
                RepositoryError::EmailAlreadyExists
            } else {
                db_err(e)
            }
        })
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE users SET last_login_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// In-memory user repository
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a stored user (test helper for flags like `is_active`)
    pub async fn put(&self, user: User) {
        self.users.lock().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let email = normalize_email(email);
        let users = self.users.lock().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_external_id(&self, subject: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.google_id.as_deref() == Some(subject))
            .cloned())
    }

    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.lock().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::EmailAlreadyExists);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn upsert_external(&self, identity: &ExternalIdentity) -> Result<User, RepositoryError> {
        let mut users = self.users.lock().await;

        if let Some(existing) = users
            .values_mut()
            .find(|u| u.google_id.as_deref() == Some(identity.subject.as_str()))
        {
            if existing.display_name.is_empty() {
                if let Some(name) = &identity.display_name {
                    existing.display_name = name.clone();
                }
            }
            if existing.photo_url.is_none() {
                existing.photo_url = identity.avatar_url.clone();
            }
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        let user = User::new_external(identity);
        if users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::EmailAlreadyExists);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.last_login_at = Some(at);
            user.updated_at = at;
        }
        Ok(())
    }
}

// ============================================================================
// Refresh tokens
// ============================================================================

/// Persistent refresh token records
///
/// Lookups never filter: a revoked or expired record is still returned and
/// the caller decides validity.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert a record; fails with `DuplicateTokenId` if the jti exists
    async fn create(&self, record: &RefreshTokenRecord) -> Result<(), RepositoryError>;

    /// Fetch a record by jti, or `TokenNotFound`
    async fn get_by_token_id(&self, token_id: &str)
        -> Result<RefreshTokenRecord, RepositoryError>;

    /// Revoke one record; returns whether anything changed
    async fn revoke_by_token_id(&self, token_id: &str) -> Result<bool, RepositoryError>;

    /// Revoke every active record of a user; returns the number revoked
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError>;

    /// Revoke `old_token_id` pointing at `replacement`, then insert `replacement`
    ///
    /// Both effects apply together or not at all. Returns `false` without
    /// inserting when the old record is missing or already revoked, so at most
    /// one rotation of a given jti ever succeeds.
    async fn rotate(
        &self,
        old_token_id: &str,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, RepositoryError>;

    /// Delete records that expired at or before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

const TOKEN_COLUMNS: &str = "id, user_id, token_id, issued_at, expires_at, revoked, replaced_by, \
                             user_agent, ip_address, created_at, updated_at";

/// PostgreSQL refresh token store
#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert<'e, E>(executor: E, record: &RefreshTokenRecord) -> Result<(), RepositoryError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_id, issued_at, expires_at, revoked,
                                        replaced_by, user_agent, ip_address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(&record.replaced_by)
        .bind(&record.user_agent)
        .bind(&record.ip_address)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::DuplicateTokenId
            } else {
                db_err(e)
            }
        })?;

        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(&self, record: &RefreshTokenRecord) -> Result<(), RepositoryError> {
        Self::insert(&self.pool, record).await
    }

    async fn get_by_token_id(
        &self,
        token_id: &str,
    ) -> Result<RefreshTokenRecord, RepositoryError> {
        sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_id = $1"
        ))
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(RepositoryError::TokenNotFound)
    }

    async fn revoke_by_token_id(&self, token_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, updated_at = NOW() \
             WHERE token_id = $1 AND revoked = FALSE",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, updated_at = NOW() \
             WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn rotate(
        &self,
        old_token_id: &str,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row lock serializes concurrent rotations; the loser re-reads
        // revoked = TRUE and updates nothing.
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, replaced_by = $2, updated_at = NOW() \
             WHERE token_id = $1 AND revoked = FALSE",
        )
        .bind(old_token_id)
        .bind(&replacement.token_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        Self::insert(&mut *tx, replacement).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}

/// In-memory refresh token store
///
/// A single lock guards all records, which makes `rotate` atomic.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, revoked or not
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(&self, record: &RefreshTokenRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.token_id) {
            return Err(RepositoryError::DuplicateTokenId);
        }
        records.insert(record.token_id.clone(), record.clone());
        Ok(())
    }

    async fn get_by_token_id(
        &self,
        token_id: &str,
    ) -> Result<RefreshTokenRecord, RepositoryError> {
        self.records
            .lock()
            .await
            .get(token_id)
            .cloned()
            .ok_or(RepositoryError::TokenNotFound)
    }

    async fn revoke_by_token_id(&self, token_id: &str) -> Result<bool, RepositoryError> {
        match self.records.lock().await.get_mut(token_id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let mut revoked = 0;
        for record in self.records.lock().await.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                record.updated_at = now;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn rotate(
        &self,
        old_token_id: &str,
        replacement: &RefreshTokenRecord,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.lock().await;

        if records.contains_key(&replacement.token_id) {
            return Err(RepositoryError::DuplicateTokenId);
        }
        match records.get_mut(old_token_id) {
            Some(old) if !old.revoked => {
                old.revoked = true;
                old.replaced_by = Some(replacement.token_id.clone());
                old.updated_at = Utc::now();
            }
            _ => return Ok(false),
        }

        records.insert(replacement.token_id.clone(), replacement.clone());
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}
