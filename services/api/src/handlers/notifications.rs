use axum::extract::{Path, Query, State};
use uuid::Uuid;

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError, Pagination};
use lesprivate_database::Notification;

use crate::notifications::NotificationFilter;
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<Pagination>,
    Query(filter): Query<NotificationFilter>,
) -> Result<ApiResponse<Vec<Notification>>, AppError> {
    let (notifications, total) = state
        .notifications
        .list(claims.user_id(), &filter, page)
        .await?;
    Ok(ApiResponse::paged(notifications, page.metadata(total)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<()>, AppError> {
    state.notifications.mark_read(claims.user_id(), id).await?;
    Ok(ApiResponse::<()>::ok())
}

pub async fn dismiss(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<()>, AppError> {
    state.notifications.mark_dismissed(claims.user_id(), id).await?;
    Ok(ApiResponse::<()>::ok())
}

pub async fn delete(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<()>, AppError> {
    state.notifications.delete(claims.user_id(), id).await?;
    Ok(ApiResponse::<()>::ok())
}
