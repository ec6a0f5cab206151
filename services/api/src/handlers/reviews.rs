use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError};
use lesprivate_database::Review;

use super::{student_id, tutor_id};
use crate::bookings::{ReviewInput, ReviewKind};
use crate::AppState;

pub async fn student_review(
    State(state): State<AppState>,
    claims: Claims,
    Path(booking_id): Path<Uuid>,
    Json(input): Json<ReviewInput>,
) -> Result<ApiResponse<Review>, AppError> {
    let student_id = student_id(&state, &claims).await?;
    let review = state
        .bookings
        .edit_review(ReviewKind::Student, student_id, booking_id, input)
        .await?;
    Ok(ApiResponse::success(review))
}

pub async fn tutor_review(
    State(state): State<AppState>,
    claims: Claims,
    Path(booking_id): Path<Uuid>,
    Json(input): Json<ReviewInput>,
) -> Result<ApiResponse<Review>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let review = state
        .bookings
        .edit_review(ReviewKind::Tutor, tutor_id, booking_id, input)
        .await?;
    Ok(ApiResponse::success(review))
}

pub async fn admin_update_review(
    State(state): State<AppState>,
    Path((kind, review_id)): Path<(ReviewKind, Uuid)>,
    Json(input): Json<ReviewInput>,
) -> Result<ApiResponse<Review>, AppError> {
    let review = state.bookings.admin_update_review(kind, review_id, input).await?;
    Ok(ApiResponse::success(review))
}

pub async fn admin_delete_review(
    State(state): State<AppState>,
    Path((kind, review_id)): Path<(ReviewKind, Uuid)>,
) -> Result<ApiResponse<()>, AppError> {
    state.bookings.admin_delete_review(kind, review_id).await?;
    Ok(ApiResponse::<()>::ok())
}
