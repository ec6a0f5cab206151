use axum::{
    extract::{Query, State},
    Json,
};

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError, Pagination};
use lesprivate_database::MentorStudent;

use super::{student_id, tutor_id};
use crate::mentor_students::{InviteCode, JoinRequest, LinkedStudent};
use crate::AppState;

pub async fn invite_code(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<ApiResponse<InviteCode>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let code = state.mentors.invite_code(tutor_id).await?;
    Ok(ApiResponse::success(code))
}

pub async fn students(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<Pagination>,
) -> Result<ApiResponse<Vec<LinkedStudent>>, AppError> {
    let tutor_id = tutor_id(&state, &claims).await?;
    let (students, total) = state.mentors.students(tutor_id, page).await?;
    Ok(ApiResponse::paged(students, page.metadata(total)))
}

pub async fn join(
    State(state): State<AppState>,
    claims: Claims,
    Json(request): Json<JoinRequest>,
) -> Result<ApiResponse<MentorStudent>, AppError> {
    let student_id = student_id(&state, &claims).await?;
    let link = state.mentors.join(student_id, request).await?;
    Ok(ApiResponse::created(link))
}
