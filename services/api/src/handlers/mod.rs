pub mod auth;
pub mod bookings;
pub mod courses;
pub mod earnings;
pub mod health;
pub mod internal;
pub mod mentors;
pub mod notifications;
pub mod reviews;
pub mod subscriptions;

use axum::{http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use uuid::Uuid;

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError};

use crate::AppState;

/// Free-text reason attached to an admin decision.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionNote {
    pub note: Option<String>,
}

pub(crate) async fn student_id(state: &AppState, claims: &Claims) -> Result<Uuid, AppError> {
    state.profiles.student_id(claims.user_id()).await
}

pub(crate) async fn tutor_id(state: &AppState, claims: &Claims) -> Result<Uuid, AppError> {
    state.profiles.tutor_id(claims.user_id()).await
}

pub async fn handler_404() -> impl IntoResponse {
    ApiResponse::<()>::error(
        StatusCode::NOT_FOUND.as_u16(),
        "Endpoint not found".to_string(),
        "NOT_FOUND",
    )
}
