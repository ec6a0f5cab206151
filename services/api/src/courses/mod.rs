//! Course content: tutor drafts, admin approval and the public catalogue.
//!
//! The `courses` row and its child tables always hold the last approved
//! (published) snapshot. Tutor edits live in `course_drafts.payload` until an
//! admin approves them; at most one non-approved draft exists per course.

pub mod drafts;
pub mod payload;
pub mod query;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use lesprivate_common::{AppError, CourseStatus, DraftStatus};
use lesprivate_database::{Course, CourseDraft, CoursePrice, CourseSchedule};

pub use drafts::CourseDraftEngine;
pub use payload::{CoursePayload, PriceTier, ScheduleSlot};
pub use query::{CourseFilter, CourseQueryEngine};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSummary {
    pub id: Uuid,
    pub status: DraftStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
}

impl From<&CourseDraft> for DraftSummary {
    fn from(draft: &CourseDraft) -> Self {
        Self {
            id: draft.id,
            status: draft.status,
            submitted_at: draft.submitted_at,
            reviewed_at: draft.reviewed_at,
            review_note: draft.review_note.clone(),
        }
    }
}

/// What a tutor sees when editing: the open draft if there is one, else the published snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseView {
    pub id: Uuid,
    pub tutor_id: Uuid,
    pub status: CourseStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub draft: Option<DraftSummary>,
    #[serde(flatten)]
    pub content: CoursePayload,
}

pub(crate) async fn find_course(
    conn: &mut PgConnection,
    course_id: Uuid,
    for_update: bool,
) -> Result<Course, AppError> {
    let sql = if for_update {
        "SELECT * FROM courses WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM courses WHERE id = $1"
    };
    sqlx::query_as::<_, Course>(sql)
        .bind(course_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Course"))
}

pub(crate) async fn open_draft(
    conn: &mut PgConnection,
    course_id: Uuid,
    for_update: bool,
) -> Result<Option<CourseDraft>, AppError> {
    let sql = if for_update {
        "SELECT * FROM course_drafts WHERE course_id = $1 AND status <> 'approved' FOR UPDATE"
    } else {
        "SELECT * FROM course_drafts WHERE course_id = $1 AND status <> 'approved'"
    };
    let draft = sqlx::query_as::<_, CourseDraft>(sql)
        .bind(course_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(draft)
}

/// Reassembles the published content of `course` from its child tables.
pub(crate) async fn load_snapshot(
    conn: &mut PgConnection,
    course: &Course,
) -> Result<CoursePayload, AppError> {
    let prices = sqlx::query_as::<_, CoursePrice>(
        "SELECT * FROM course_prices WHERE course_id = $1 ORDER BY duration_minutes",
    )
    .bind(course.id)
    .fetch_all(&mut *conn)
    .await?;

    let schedules = sqlx::query_as::<_, CourseSchedule>(
        "SELECT * FROM course_schedules WHERE course_id = $1 ORDER BY weekday, start_time",
    )
    .bind(course.id)
    .fetch_all(&mut *conn)
    .await?;

    let sub_category_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT sub_course_category_id FROM course_sub_categories WHERE course_id = $1 ORDER BY 1",
    )
    .bind(course.id)
    .fetch_all(&mut *conn)
    .await?;

    let education_levels = sqlx::query_scalar::<_, String>(
        "SELECT education_level FROM course_education_levels WHERE course_id = $1 ORDER BY 1",
    )
    .bind(course.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(CoursePayload::from_snapshot(
        course,
        sub_category_ids,
        education_levels,
        &prices,
        &schedules,
    ))
}

pub(crate) async fn build_view(
    conn: &mut PgConnection,
    course: Course,
) -> Result<CourseView, AppError> {
    let draft = open_draft(conn, course.id, false).await?;
    let content = match &draft {
        Some(draft) => CoursePayload::from_value(&draft.payload)?,
        None => load_snapshot(conn, &course).await?,
    };

    Ok(CourseView {
        id: course.id,
        tutor_id: course.tutor_id,
        status: course.status,
        published_at: course.published_at,
        draft: draft.as_ref().map(DraftSummary::from),
        content,
    })
}
