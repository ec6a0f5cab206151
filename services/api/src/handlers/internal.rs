use axum::{extract::State, http::HeaderMap};

use lesprivate_common::{ApiResponse, AppError};

use crate::bookings::sweeps::Sweep;
use crate::encryption::constant_time_eq;
use crate::scheduler::SweepTask;
use crate::AppState;

const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// Open when no key is configured; otherwise the header must match it.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.config.internal_key.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Authentication("Invalid internal key".to_string()))
    }
}

fn trigger(state: &AppState, headers: &HeaderMap, task: SweepTask) -> Result<ApiResponse<()>, AppError> {
    authorize(state, headers)?;
    state.sweeps.spawn(task);
    tracing::info!(sweep = task.name(), "Sweep triggered");
    Ok(ApiResponse::<()>::ok())
}

pub async fn expire_bookings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse<()>, AppError> {
    trigger(&state, &headers, SweepTask::Booking(Sweep::Expire))
}

pub async fn remind_expiring(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse<()>, AppError> {
    trigger(&state, &headers, SweepTask::Booking(Sweep::ExpiryReminder))
}

pub async fn remind_course(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse<()>, AppError> {
    trigger(&state, &headers, SweepTask::Booking(Sweep::CourseReminder))
}

pub async fn request_reviews(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse<()>, AppError> {
    trigger(&state, &headers, SweepTask::Booking(Sweep::ReviewRequest))
}

pub async fn notification_retention(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse<()>, AppError> {
    trigger(&state, &headers, SweepTask::NotificationRetention)
}
