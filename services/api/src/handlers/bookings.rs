use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError, Pagination};

use super::{student_id, tutor_id};
use crate::bookings::{BookingFilter, BookingParties, CreateBooking, RespondBooking};
use crate::AppState;

pub async fn create_booking(
    State(state): State<AppState>,
    claims: Claims,
    Json(input): Json<CreateBooking>,
) -> Result<ApiResponse<BookingParties>, AppError> {
    let student_id = student_id(&state, &claims).await?;
    let booking = state.bookings.create(student_id, input).await?;
    Ok(ApiResponse::created(booking))
}

pub async fn student_bookings(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<Pagination>,
    Query(filter): Query<BookingFilter>,
) -> Result<ApiResponse<Vec<BookingParties>>, AppError> {
    let student_id = student_id(&state, &claims).await?;
    let (bookings, total) = state.bookings.list_for_student(student_id, &filter, page).await?;
    Ok(ApiResponse::paged(bookings, page.metadata(total)))
}

pub async fn tutor_bookings(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<Pagination>,
    Query(filter): Query<BookingFilter>,
) -> Result<ApiResponse<Vec<BookingParties>>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let (bookings, total) = state.bookings.list_for_tutor(tutor_id, &filter, page).await?;
    Ok(ApiResponse::paged(bookings, page.metadata(total)))
}

pub async fn approve_booking(
    State(state): State<AppState>,
    claims: Claims,
    Path(booking_id): Path<Uuid>,
    body: Option<Json<RespondBooking>>,
) -> Result<ApiResponse<BookingParties>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let input = body.map(|Json(b)| b).unwrap_or_default();
    let booking = state.bookings.accept(tutor_id, booking_id, input).await?;
    Ok(ApiResponse::success(booking))
}

pub async fn decline_booking(
    State(state): State<AppState>,
    claims: Claims,
    Path(booking_id): Path<Uuid>,
    body: Option<Json<RespondBooking>>,
) -> Result<ApiResponse<BookingParties>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let input = body.map(|Json(b)| b).unwrap_or_default();
    let booking = state.bookings.decline(tutor_id, booking_id, input).await?;
    Ok(ApiResponse::success(booking))
}
