use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError, Pagination};
use lesprivate_database::CourseDraft;

use super::{tutor_id, DecisionNote};
use crate::courses::drafts::{PendingDraft, TutorCourseSummary};
use crate::courses::query::{CourseCard, PublishedCourse};
use crate::courses::{CourseFilter, CoursePayload, CourseView};
use crate::AppState;

const VIEW_RECORD_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailQuery {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

// Public catalogue

pub async fn search(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
    Query(filter): Query<CourseFilter>,
) -> Result<ApiResponse<Vec<CourseCard>>, AppError> {
    let (cards, total) = state.catalog.search(&filter, page).await?;
    Ok(ApiResponse::paged(cards, page.metadata(total)))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Query(query): Query<DetailQuery>,
) -> Result<ApiResponse<PublishedCourse>, AppError> {
    let course = state
        .catalog
        .detail(course_id, query.latitude.zip(query.longitude))
        .await?;

    if let Some(redis) = state.redis.clone() {
        tokio::spawn(async move {
            match tokio::time::timeout(VIEW_RECORD_TIMEOUT, redis.record_course_view(course_id)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(%course_id, error = %e, "Could not record course view"),
                Err(_) => tracing::warn!(%course_id, "Recording course view timed out"),
            }
        });
    }

    Ok(ApiResponse::success(course))
}

// Tutor authoring

pub async fn create_course(
    State(state): State<AppState>,
    claims: Claims,
    Json(payload): Json<CoursePayload>,
) -> Result<ApiResponse<CourseView>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let view = state.drafts.create(tutor_id, payload).await?;
    Ok(ApiResponse::created(view))
}

pub async fn update_course(
    State(state): State<AppState>,
    claims: Claims,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<CoursePayload>,
) -> Result<ApiResponse<CourseView>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let view = state.drafts.update(tutor_id, course_id, payload).await?;
    Ok(ApiResponse::success(view))
}

pub async fn submit_course(
    State(state): State<AppState>,
    claims: Claims,
    Path(course_id): Path<Uuid>,
) -> Result<ApiResponse<CourseView>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let view = state.drafts.submit(tutor_id, course_id).await?;
    Ok(ApiResponse::success(view))
}

pub async fn delete_course(
    State(state): State<AppState>,
    claims: Claims,
    Path(course_id): Path<Uuid>,
) -> Result<ApiResponse<()>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    state.drafts.delete(tutor_id, course_id).await?;
    Ok(ApiResponse::<()>::ok())
}

pub async fn my_course(
    State(state): State<AppState>,
    claims: Claims,
    Path(course_id): Path<Uuid>,
) -> Result<ApiResponse<CourseView>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let view = state.drafts.working_view(tutor_id, course_id).await?;
    Ok(ApiResponse::success(view))
}

pub async fn my_courses(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<Pagination>,
) -> Result<ApiResponse<Vec<TutorCourseSummary>>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let (courses, total) = state.drafts.list_for_tutor(tutor_id, page).await?;
    Ok(ApiResponse::paged(courses, page.metadata(total)))
}

// Admin review queue

pub async fn pending_drafts(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<ApiResponse<Vec<PendingDraft>>, AppError> {
    let (drafts, total) = state.drafts.pending_drafts(page).await?;
    Ok(ApiResponse::paged(drafts, page.metadata(total)))
}

pub async fn draft_history(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<ApiResponse<Vec<CourseDraft>>, AppError> {
    let drafts = state.drafts.draft_history(course_id).await?;
    Ok(ApiResponse::success(drafts))
}

pub async fn approve_course(
    State(state): State<AppState>,
    claims: Claims,
    Path(course_id): Path<Uuid>,
    body: Option<Json<DecisionNote>>,
) -> Result<ApiResponse<CourseView>, AppError> {
    let note = body.and_then(|Json(b)| b.note);
    let view = state.drafts.approve(claims.user_id(), course_id, note).await?;
    Ok(ApiResponse::success(view))
}

pub async fn reject_course(
    State(state): State<AppState>,
    claims: Claims,
    Path(course_id): Path<Uuid>,
    Json(body): Json<DecisionNote>,
) -> Result<ApiResponse<CourseView>, AppError> {
    let view = state
        .drafts
        .reject(claims.user_id(), course_id, body.note.unwrap_or_default())
        .await?;
    Ok(ApiResponse::success(view))
}
