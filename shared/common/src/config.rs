use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Reads `key`, falling back to `default` when unset.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Reads and parses `key`. Unset means `default`; a value that does not parse is an error.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

pub fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub max_lifetime_secs: u64,
    pub timezone: String,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Loads a DSN from `{prefix}_HOST`, `{prefix}_PORT`, ... variables.
    pub fn from_env_prefixed(prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);
        Ok(Self {
            host: env_or(&key("HOST"), "localhost"),
            port: env_parse(&key("PORT"), 5432)?,
            username: env_or(&key("USERNAME"), "lesprivate"),
            password: env_or(&key("PASSWORD"), "lesprivate"),
            database: env_or(&key("NAME"), "lesprivate"),
            max_connections: env_parse(&key("MAX_CONNECTIONS"), 10)?,
            max_lifetime_secs: env_parse(&key("MAX_LIFETIME_SECS"), 1800)?,
            timezone: env_or(&key("TIMEZONE"), "UTC"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: u8,
    pub max_retries: usize,
}

impl RedisConfig {
    pub fn connection_string(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.database),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or("REDIS_HOST", "localhost"),
            port: env_parse("REDIS_PORT", 6379)?,
            password: std::env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            database: env_parse("REDIS_DB", 0)?,
            max_retries: env_parse("REDIS_MAX_RETRIES", 3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_expiration_minutes: i64,
    pub refresh_expiration_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}
