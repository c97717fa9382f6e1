//! Encore CLI - operator commands
//!
//! Usage:
//!   encore init-schema
//!   encore purge-expired
//!   encore revoke-all --user <uuid>
//!   encore hash-password [--password <p>]
//!   encore verify-token <token> [--refresh]

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use encore_api::audit::{audit_log, AuditEvent};
use encore_api::auth::{
    init_schema, JwtConfig, PasswordHasher, PgRefreshTokenStore, RefreshTokenStore, TokenCodec,
};
use encore_api::state::connect;
use encore_core::AppConfig;
use sqlx::PgPool;
use std::io::BufRead;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "encore")]
#[command(about = "Encore session service operator CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true, env = "ENCORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables
    InitSchema,
    /// Delete refresh records past their expiry
    PurgeExpired,
    /// Revoke every refresh token of a user
    RevokeAll {
        /// User ID
        #[arg(long)]
        user: Uuid,
    },
    /// Hash a password with the configured Argon2 parameters
    HashPassword {
        /// Password to hash; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Verify a token and print its claims
    VerifyToken {
        token: String,
        /// Verify as a refresh token instead of an access token
        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::InitSchema => {
            let pool = database(&config).await?;
            init_schema(&pool).await?;
            println!("Schema initialized");
        }
        Commands::PurgeExpired => {
            let store = PgRefreshTokenStore::new(database(&config).await?);
            let deleted = store.purge_expired(Utc::now()).await?;
            println!("Purged {deleted} expired refresh token(s)");
        }
        Commands::RevokeAll { user } => {
            let store = PgRefreshTokenStore::new(database(&config).await?);
            let revoked = revoke_all(&store, user).await?;
            println!("Revoked {revoked} refresh token(s) for {user}");
        }
        Commands::HashPassword { password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let hasher = PasswordHasher::new(config.auth.argon2.into())?;
            println!("{}", hasher.hash(&password)?);
        }
        Commands::VerifyToken { token, refresh } => {
            let codec = TokenCodec::new(JwtConfig::from_auth_config(&config.auth)?);
            let claims = if refresh {
                codec.verify_refresh(&token)?
            } else {
                codec.verify_access(&token)?
            };
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
    }

    Ok(())
}

/// Load configuration without the server's cross-field validation
///
/// Commands that only need Argon2 parameters must work without JWT secrets.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn database(config: &AppConfig) -> anyhow::Result<PgPool> {
    let Some(url) = config.database.url.as_deref() else {
        bail!("DATABASE_URL is required for this command");
    };
    connect(config, url).await
}

/// Revoke every refresh token of a user, audited like the admin endpoint
async fn revoke_all(store: &dyn RefreshTokenStore, user: Uuid) -> anyhow::Result<u64> {
    let count = store.revoke_all_for_user(user).await?;
    audit_log(&AuditEvent::SessionsRevoked {
        user_id: user,
        revoked_by: None,
        count,
    });
    Ok(count)
}

fn read_password() -> anyhow::Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}
