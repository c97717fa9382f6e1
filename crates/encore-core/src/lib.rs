//! Encore Core - Shared configuration
//!
//! This crate holds the pieces shared by the API server and the operator CLI:
//! - Application configuration model and its sections
//! - Environment and TOML loading
//! - Configuration validation errors

pub mod config;

pub use config::{
    AppConfig, Argon2Config, AuthConfig, ConfigError, DatabaseConfig, GoogleConfig,
    LoggingConfig, ServerConfig,
};
