use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::types::ApiResponse;

/// Machine-readable codes carried by invariant failures.
pub mod codes {
    pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
    pub const DUPLICATE_PENDING_BOOKING: &str = "DUPLICATE_PENDING_BOOKING";
    pub const DUPLICATE_DRAFT: &str = "DUPLICATE_DRAFT";
    pub const INVALID_STATE_TRANSITION: &str = "INVALID_STATE_TRANSITION";
    pub const COURSE_DELETED: &str = "COURSE_DELETED";
    pub const ALREADY_LINKED: &str = "ALREADY_LINKED";
    pub const REVIEW_NOT_OPEN: &str = "REVIEW_NOT_OPEN";
    pub const CONSTRAINT_VIOLATION: &str = "CONSTRAINT_VIOLATION";
    pub const COURSE_NOT_BOOKABLE: &str = "COURSE_NOT_BOOKABLE";
    pub const BOOKING_EXPIRED: &str = "BOOKING_EXPIRED";
    pub const ALREADY_SUBSCRIBED: &str = "ALREADY_SUBSCRIBED";
    pub const NOT_DELETEABLE: &str = "NOT_DELETEABLE";
}

/// Coarse failure class callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Invariant,
    External,
    Transient,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict ({code}): {message}")]
    Conflict { code: &'static str, message: String },

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    /// SQLSTATE of the underlying Postgres error, if any.
    pub fn sql_state(&self) -> Option<String> {
        match self {
            AppError::Database(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Authentication(_) | AppError::Authorization(_) => ErrorKind::Auth,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict { .. } => ErrorKind::Invariant,
            AppError::ExternalService(_) | AppError::GatewayTimeout(_) => ErrorKind::External,
            AppError::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            AppError::Database(_) => match self.sql_state().as_deref() {
                Some("23505") | Some("23503") | Some("23514") => ErrorKind::Invariant,
                _ => ErrorKind::Transient,
            },
            AppError::Redis(_) | AppError::Internal(_) => ErrorKind::Transient,
        }
    }

    /// Deadlocks and serialization failures; the whole transaction may be replayed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.sql_state().as_deref(), Some("40P01") | Some("40001"))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Authentication(_) => 401,
            AppError::Authorization(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Validation(_) => 400,
            AppError::Conflict { .. } => 409,
            AppError::ExternalService(_) => 502,
            AppError::GatewayTimeout(_) => 504,
            _ => match self.kind() {
                ErrorKind::NotFound => 404,
                ErrorKind::Invariant => 409,
                _ => 500,
            },
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            AppError::Database(_) => match self.kind() {
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::Invariant => codes::CONSTRAINT_VIOLATION,
                _ => "DATABASE_ERROR",
            },
            AppError::Redis(_) => "CACHE_ERROR",
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::Authorization(_) => "AUTHORIZATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict { code, .. } => *code,
            AppError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Text safe to show a client. Driver and infrastructure detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::Conflict { message, .. } => message.clone(),
            AppError::ExternalService(_) => "upstream service failed".to_string(),
            AppError::GatewayTimeout(_) => "upstream service timed out".to_string(),
            AppError::Database(_) => match self.kind() {
                ErrorKind::NotFound => "record not found".to_string(),
                ErrorKind::Invariant => "request conflicts with existing data".to_string(),
                _ => "internal server error".to_string(),
            },
            AppError::Redis(_) | AppError::Internal(_) => "internal server error".to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));

        let message = fields
            .first()
            .and_then(|(field, errs)| {
                errs.first().map(|e| match &e.message {
                    Some(msg) => format!("{}: {}", field, msg),
                    None => format!("{}: failed {}", field, e.code),
                })
            })
            .unwrap_or_else(|| "invalid request".to_string());

        AppError::Validation(message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "request rejected");
        }

        ApiResponse::<()>::error(status.as_u16(), self.public_message(), self.error_code())
            .into_response()
    }
}
