use axum::extract::State;
use serde::Serialize;

use lesprivate_common::{ApiResponse, AppError};

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub database: &'static str,
    pub redis: &'static str,
}

/// Fails when Postgres is unreachable; Redis only degrades the report.
pub async fn health_check(State(state): State<AppState>) -> Result<ApiResponse<HealthStatus>, AppError> {
    sqlx::query("SELECT 1").execute(state.db.writer()).await?;

    let redis = match &state.redis {
        Some(redis) => match redis.health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Redis health check failed");
                "unavailable"
            }
        },
        None => "disabled",
    };

    Ok(ApiResponse::success(HealthStatus {
        database: "ok",
        redis,
    }))
}
