use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError, Pagination};
use lesprivate_database::{BalanceTransaction, MentorBalance};

use super::{tutor_id, DecisionNote};
use crate::earnings::{WithdrawalFilter, WithdrawalInput, WithdrawalView};
use crate::AppState;

pub async fn balance(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<ApiResponse<MentorBalance>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let balance = state.earnings.balance(tutor_id).await?;
    Ok(ApiResponse::success(balance))
}

pub async fn transactions(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<Pagination>,
) -> Result<ApiResponse<Vec<BalanceTransaction>>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let (transactions, total) = state.earnings.transactions(tutor_id, page).await?;
    Ok(ApiResponse::paged(transactions, page.metadata(total)))
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    claims: Claims,
    Json(input): Json<WithdrawalInput>,
) -> Result<ApiResponse<WithdrawalView>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let withdrawal = state.earnings.request_withdrawal(tutor_id, input).await?;
    Ok(ApiResponse::created(withdrawal))
}

pub async fn my_withdrawals(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<Pagination>,
    Query(filter): Query<WithdrawalFilter>,
) -> Result<ApiResponse<Vec<WithdrawalView>>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let (withdrawals, total) = state.earnings.list_for_tutor(tutor_id, &filter, page).await?;
    Ok(ApiResponse::paged(withdrawals, page.metadata(total)))
}

// Admin

pub async fn all_withdrawals(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
    Query(filter): Query<WithdrawalFilter>,
) -> Result<ApiResponse<Vec<WithdrawalView>>, AppError> {
    let (withdrawals, total) = state.earnings.list_all(&filter, page).await?;
    Ok(ApiResponse::paged(withdrawals, page.metadata(total)))
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    claims: Claims,
    Path(withdrawal_id): Path<Uuid>,
) -> Result<ApiResponse<WithdrawalView>, AppError> {
    let withdrawal = state.earnings.approve(claims.user_id(), withdrawal_id).await?;
    Ok(ApiResponse::success(withdrawal))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    claims: Claims,
    Path(withdrawal_id): Path<Uuid>,
    Json(body): Json<DecisionNote>,
) -> Result<ApiResponse<WithdrawalView>, AppError> {
    let withdrawal = state
        .earnings
        .reject(claims.user_id(), withdrawal_id, body.note.unwrap_or_default())
        .await?;
    Ok(ApiResponse::success(withdrawal))
}
