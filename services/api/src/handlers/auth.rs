use axum::{extract::State, Json};

use lesprivate_common::{ApiResponse, AppError};

use crate::accounts::{LoginRequest, RefreshRequest, Session};
use crate::AppState;

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<ApiResponse<Session>, AppError> {
    let session = state.accounts.login(request).await?;
    Ok(ApiResponse::success(session))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<ApiResponse<Session>, AppError> {
    let session = state.accounts.refresh(request).await?;
    Ok(ApiResponse::success(session))
}
