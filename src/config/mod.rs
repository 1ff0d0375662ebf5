//! Configuration management
//!
//! Configuration is loaded from a `config.yml` file and can be overridden by
//! `SESSIONGATE_*` environment variables. Missing optional values are filled
//! with defaults; signing keys have no usable default and must be provided.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Token signing configuration
    #[serde(default)]
    pub jwt: JwtConfig,
    /// Revocation cache configuration
    #[serde(default)]
    pub session_cache: SessionCacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Application name reported by the health check
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_app_name() -> String {
    "sessiongate".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound for a single credential store call, in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Per-call timeout as a `Duration`
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            query_timeout_seconds: default_query_timeout(),
        }
    }
}

fn default_database_url() -> String {
    "data/sessiongate.db".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_query_timeout() -> u64 {
    5
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Signing keys and token lifetimes.
///
/// Access and refresh tokens share `secret_key`. Admin tokens use the separate
/// `admin_key`, API keys use `api_key`.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub admin_key: String,
    #[serde(default)]
    pub api_key: String,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_expires")]
    pub access_expires_seconds: i64,
    /// Refresh token lifetime in seconds (caps the whole session)
    #[serde(default = "default_refresh_expires")]
    pub refresh_expires_seconds: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret_key", &"<redacted>")
            .field("admin_key", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("access_expires_seconds", &self.access_expires_seconds)
            .field("refresh_expires_seconds", &self.refresh_expires_seconds)
            .finish()
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            admin_key: String::new(),
            api_key: String::new(),
            access_expires_seconds: default_access_expires(),
            refresh_expires_seconds: default_refresh_expires(),
        }
    }
}

fn default_access_expires() -> i64 {
    86_400
}

fn default_refresh_expires() -> i64 {
    604_800
}

/// Revocation cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// How long a confirmed live session is trusted without a store lookup
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_seconds: default_cache_ttl(),
            max_capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_cache_capacity() -> u64 {
    10_000
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - SESSIONGATE_SERVER_HOST / SESSIONGATE_SERVER_PORT
    /// - SESSIONGATE_DATABASE_DRIVER / SESSIONGATE_DATABASE_URL
    /// - SESSIONGATE_DATABASE_QUERY_TIMEOUT_SECONDS
    /// - SESSIONGATE_JWT_SECRET_KEY / SESSIONGATE_JWT_ADMIN_KEY / SESSIONGATE_JWT_API_KEY
    /// - SESSIONGATE_JWT_ACCESS_EXPIRES_SECONDS / SESSIONGATE_JWT_REFRESH_EXPIRES_SECONDS
    /// - SESSIONGATE_SESSION_CACHE_ENABLED / SESSIONGATE_SESSION_CACHE_TTL_SECONDS
    pub fn load_with_env(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject configurations the token codec cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwt = &self.jwt;
        for (name, value) in [
            ("jwt.secret_key", &jwt.secret_key),
            ("jwt.admin_key", &jwt.admin_key),
            ("jwt.api_key", &jwt.api_key),
        ] {
            if value.is_empty() {
                return Err(ConfigError::ValidationError(format!("{} must be set", name)));
            }
        }
        if jwt.secret_key == jwt.admin_key {
            return Err(ConfigError::ValidationError(
                "jwt.admin_key must differ from jwt.secret_key".to_string(),
            ));
        }
        if jwt.access_expires_seconds <= 0 || jwt.refresh_expires_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "token lifetimes must be positive".to_string(),
            ));
        }
        if self.database.query_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "database.query_timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SESSIONGATE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SESSIONGATE_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(driver) = std::env::var("SESSIONGATE_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("SESSIONGATE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(timeout) = std::env::var("SESSIONGATE_DATABASE_QUERY_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.database.query_timeout_seconds = timeout;
            }
        }

        if let Ok(key) = std::env::var("SESSIONGATE_JWT_SECRET_KEY") {
            self.jwt.secret_key = key;
        }
        if let Ok(key) = std::env::var("SESSIONGATE_JWT_ADMIN_KEY") {
            self.jwt.admin_key = key;
        }
        if let Ok(key) = std::env::var("SESSIONGATE_JWT_API_KEY") {
            self.jwt.api_key = key;
        }
        if let Ok(secs) = std::env::var("SESSIONGATE_JWT_ACCESS_EXPIRES_SECONDS") {
            if let Ok(secs) = secs.parse::<i64>() {
                self.jwt.access_expires_seconds = secs;
            }
        }
        if let Ok(secs) = std::env::var("SESSIONGATE_JWT_REFRESH_EXPIRES_SECONDS") {
            if let Ok(secs) = secs.parse::<i64>() {
                self.jwt.refresh_expires_seconds = secs;
            }
        }

        if let Ok(enabled) = std::env::var("SESSIONGATE_SESSION_CACHE_ENABLED") {
            if let Ok(enabled) = enabled.parse::<bool>() {
                self.session_cache.enabled = enabled;
            }
        }
        if let Ok(ttl) = std::env::var("SESSIONGATE_SESSION_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.session_cache.ttl_seconds = ttl;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Tests that touch process environment share this lock.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
