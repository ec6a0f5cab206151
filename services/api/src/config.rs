use lesprivate_common::{
    env_or, env_parse, env_required, ConfigError, DatabaseConfig, JwtConfig, RedisConfig,
    ServerConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Optional read replica; reads fall back to the primary when unset.
    pub database_read: Option<DatabaseConfig>,
    pub enable_migration: bool,
    pub transaction_retries: u32,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub gateway: GatewayConfig,
    pub email: EmailConfig,
    pub booking: BookingConfig,
    pub sweeps: SweepConfig,
    pub notifications: NotificationConfig,
    pub encryption: EncryptionConfig,
    /// Shared secret expected in `X-Internal-Key` on the sweep endpoints.
    pub internal_key: Option<String>,
    /// Base of the links embedded in emails and in-app notifications.
    pub app_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub callback_token: String,
    pub currency: String,
    pub timeout_secs: u64,
    pub success_redirect_url: String,
    pub failure_redirect_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    pub default_expiration_hours: i32,
    pub expiry_reminder_minutes: i64,
    pub course_reminder_minutes: i64,
    pub review_delay_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub batch_size: i64,
    pub batch_timeout_secs: u64,
    pub cron_enabled: bool,
    pub cron_expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub retention_days: i64,
    pub delivery_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub key: String,
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_read = match env_optional("DATABASE_READ_HOST") {
            Some(_) => Some(DatabaseConfig::from_env_prefixed("DATABASE_READ")?),
            None => None,
        };

        let encryption_key = env_required("ENCRYPTION_KEY")?;
        if encryption_key.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "ENCRYPTION_KEY".to_string(),
                "must be at least 32 characters".to_string(),
            ));
        }

        Ok(Self {
            server: ServerConfig {
                host: env_or("API_HOST", "0.0.0.0"),
                port: env_parse("API_PORT", 8080)?,
                cors_origins: env_list("CORS_ORIGINS", "http://localhost:3000"),
                request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 30)?,
            },
            database: DatabaseConfig::from_env_prefixed("DATABASE")?,
            database_read,
            enable_migration: env_parse("ENABLE_MIGRATION", true)?,
            transaction_retries: env_parse("DATABASE_TX_RETRIES", 3)?,
            redis: RedisConfig::from_env()?,
            jwt: JwtConfig {
                secret: env_required("JWT_SECRET")?,
                issuer: env_or("JWT_ISSUER", "lesprivate"),
                access_expiration_minutes: env_parse("JWT_ACCESS_EXPIRATION_MINUTES", 60)?,
                refresh_expiration_hours: env_parse("JWT_REFRESH_EXPIRATION_HOURS", 24 * 7)?,
            },
            gateway: GatewayConfig {
                base_url: env_or("XENDIT_BASE_URL", "https://api.xendit.co"),
                secret_key: env_required("XENDIT_SECRET_KEY")?,
                callback_token: env_required("XENDIT_CALLBACK_TOKEN")?,
                currency: env_or("XENDIT_CURRENCY", "IDR"),
                timeout_secs: env_parse("XENDIT_TIMEOUT_SECS", 15)?,
                success_redirect_url: env_or(
                    "XENDIT_SUCCESS_REDIRECT_URL",
                    "http://localhost:3000/subscriptions/success",
                ),
                failure_redirect_url: env_or(
                    "XENDIT_FAILURE_REDIRECT_URL",
                    "http://localhost:3000/subscriptions/failed",
                ),
            },
            email: EmailConfig {
                enabled: env_parse("EMAIL_ENABLED", false)?,
                smtp_host: env_or("SMTP_HOST", "localhost"),
                smtp_port: env_parse("SMTP_PORT", 587)?,
                smtp_username: env_or("SMTP_USERNAME", ""),
                smtp_password: env_or("SMTP_PASSWORD", ""),
                from_email: env_or("EMAIL_FROM", "no-reply@lesprivate.id"),
                from_name: env_or("EMAIL_FROM_NAME", "Lesprivate"),
                reply_to: env_optional("EMAIL_REPLY_TO"),
            },
            booking: BookingConfig {
                default_expiration_hours: env_parse("BOOKING_EXPIRATION_HOURS", 24)?,
                expiry_reminder_minutes: env_parse("BOOKING_EXPIRY_REMINDER_MINUTES", 120)?,
                course_reminder_minutes: env_parse("BOOKING_COURSE_REMINDER_MINUTES", 60)?,
                review_delay_minutes: env_parse("BOOKING_REVIEW_DELAY_MINUTES", 60)?,
            },
            sweeps: SweepConfig {
                batch_size: env_parse("SWEEP_BATCH_SIZE", 100)?,
                batch_timeout_secs: env_parse("SWEEP_BATCH_TIMEOUT_SECS", 30)?,
                cron_enabled: env_parse("SWEEP_CRON_ENABLED", false)?,
                cron_expression: env_or("SWEEP_CRON", "0 */5 * * * *"),
            },
            notifications: NotificationConfig {
                retention_days: env_parse("NOTIFICATION_RETENTION_DAYS", 30)?,
                delivery_timeout_secs: env_parse("NOTIFICATION_DELIVERY_TIMEOUT_SECS", 10)?,
            },
            encryption: EncryptionConfig {
                key: encryption_key,
            },
            internal_key: env_optional("INTERNAL_API_KEY"),
            app_base_url: env_or("APP_BASE_URL", "http://localhost:3000"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_drop_blank_entries() {
        std::env::set_var("LESPRIVATE_TEST_ORIGINS", "https://a.id, ,https://b.id");
        assert_eq!(
            env_list("LESPRIVATE_TEST_ORIGINS", ""),
            vec!["https://a.id".to_string(), "https://b.id".to_string()]
        );
    }

    #[test]
    fn blank_optional_is_none() {
        std::env::set_var("LESPRIVATE_TEST_BLANK", "  ");
        assert_eq!(env_optional("LESPRIVATE_TEST_BLANK"), None);
    }
}
