use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use lesprivate_common::{
    codes, AppError, CourseStatus, DraftStatus, NotificationKind, Pagination,
};
use lesprivate_database::{CourseDraft, Database};

use super::{build_view, find_course, open_draft, CoursePayload, CourseView};
use crate::notifier::{Notice, Notifier};
use crate::templates::EmailTemplate;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TutorCourseSummary {
    pub id: Uuid,
    pub title: String,
    pub status: CourseStatus,
    pub draft_status: Option<DraftStatus>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub total_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PendingDraft {
    pub draft_id: Uuid,
    pub course_id: Uuid,
    pub tutor_id: Uuid,
    pub tutor_name: String,
    pub title: String,
    pub submitted_at: Option<DateTime<Utc>>,
    /// The course already has a published version this draft would replace.
    pub is_update: bool,
    #[serde(skip)]
    pub total_count: i64,
}

/// Draft lifecycle: create, fork on edit, submit, approve or reject.
#[derive(Clone)]
pub struct CourseDraftEngine {
    db: Database,
    notifier: Notifier,
    default_expiration_hours: i32,
}

fn owned_live(course: &lesprivate_database::Course, tutor_id: Uuid) -> Result<(), AppError> {
    if course.tutor_id != tutor_id || course.deleted_at.is_some() {
        return Err(AppError::not_found("Course"));
    }
    Ok(())
}

/// The partial unique index on open drafts turns a lost race into a 23505.
fn duplicate_draft(err: AppError) -> AppError {
    match err.sql_state().as_deref() {
        Some("23505") => AppError::conflict(
            codes::DUPLICATE_DRAFT,
            "Another draft for this course is already open",
        ),
        _ => err,
    }
}

async fn tutor_user_id(conn: &mut PgConnection, tutor_id: Uuid) -> Result<Uuid, AppError> {
    let user_id = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM tutors WHERE id = $1")
        .bind(tutor_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(user_id)
}

/// Checks that need the database: category tree and tutor location.
async fn check_references(
    conn: &mut PgConnection,
    tutor_id: Uuid,
    payload: &CoursePayload,
) -> Result<(), AppError> {
    let category_exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM course_categories WHERE id = $1)",
    )
    .bind(payload.course_category_id)
    .fetch_one(&mut *conn)
    .await?;
    if !category_exists {
        return Err(AppError::Validation("courseCategoryId: unknown category".to_string()));
    }

    let wanted: BTreeSet<Uuid> = payload.sub_category_ids.iter().copied().collect();
    if !wanted.is_empty() {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sub_course_categories WHERE id = ANY($1) AND course_category_id = $2",
        )
        .bind(wanted.iter().copied().collect::<Vec<_>>())
        .bind(payload.course_category_id)
        .fetch_one(&mut *conn)
        .await?;
        if found != wanted.len() as i64 {
            return Err(AppError::Validation(
                "subCategoryIds: every sub-category must belong to the course category".to_string(),
            ));
        }
    }

    if payload.class_type.needs_location() {
        let located = sqlx::query_scalar::<_, bool>(
            "SELECT latitude IS NOT NULL AND longitude IS NOT NULL FROM tutors WHERE id = $1",
        )
        .bind(tutor_id)
        .fetch_one(&mut *conn)
        .await?;
        if !located {
            return Err(AppError::Validation(
                "classType: offline lessons require the tutor's location".to_string(),
            ));
        }
    }

    Ok(())
}

/// Replaces the published child rows and scalar fields with `payload`.
async fn publish(
    conn: &mut PgConnection,
    course_id: Uuid,
    payload: &CoursePayload,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    for table in [
        "course_prices",
        "course_schedules",
        "course_sub_categories",
        "course_education_levels",
    ] {
        sqlx::query(&format!("DELETE FROM {} WHERE course_id = $1", table))
            .bind(course_id)
            .execute(&mut *conn)
            .await?;
    }

    for tier in &payload.prices {
        sqlx::query(
            "INSERT INTO course_prices (id, course_id, duration_minutes, price) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(tier.duration_minutes)
        .bind(tier.price)
        .execute(&mut *conn)
        .await?;
    }

    for slot in &payload.schedules {
        sqlx::query(
            r#"
            INSERT INTO course_schedules (id, course_id, weekday, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(slot.weekday)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .execute(&mut *conn)
        .await?;
    }

    let sub_categories: BTreeSet<Uuid> = payload.sub_category_ids.iter().copied().collect();
    for sub_category_id in sub_categories {
        sqlx::query(
            "INSERT INTO course_sub_categories (course_id, sub_course_category_id) VALUES ($1, $2)",
        )
        .bind(course_id)
        .bind(sub_category_id)
        .execute(&mut *conn)
        .await?;
    }

    let levels: BTreeSet<String> = payload
        .education_levels
        .iter()
        .map(|l| l.trim().to_lowercase())
        .collect();
    for level in levels {
        sqlx::query(
            "INSERT INTO course_education_levels (course_id, education_level) VALUES ($1, $2)",
        )
        .bind(course_id)
        .bind(level)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE courses
        SET title = $2, description = $3, course_category_id = $4, class_type = $5,
            is_free_first_course = $6, expiration_hours = $7, status = 'accepted',
            published_at = $8, updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(course_id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.course_category_id)
    .bind(payload.class_type)
    .bind(payload.is_free_first_course)
    .bind(payload.expiration_hours.unwrap_or(24))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

impl CourseDraftEngine {
    pub fn new(db: Database, notifier: Notifier, default_expiration_hours: i32) -> Self {
        Self {
            db,
            notifier,
            default_expiration_hours,
        }
    }

    fn prepare(&self, mut payload: CoursePayload) -> Result<CoursePayload, AppError> {
        payload.expiration_hours = Some(
            payload
                .expiration_hours
                .unwrap_or(self.default_expiration_hours),
        );
        payload.check()?;
        Ok(payload)
    }

    async fn view(&self, course_id: Uuid) -> Result<CourseView, AppError> {
        // Read-your-writes: views after a mutation come from the primary.
        let mut conn = self.db.writer().acquire().await?;
        let course = find_course(&mut conn, course_id, false).await?;
        build_view(&mut conn, course).await
    }

    /// New course: a placeholder row in `draft` status plus its first draft.
    pub async fn create(&self, tutor_id: Uuid, payload: CoursePayload) -> Result<CourseView, AppError> {
        let payload = self.prepare(payload)?;
        let value = payload.to_value()?;
        let course_id = Uuid::new_v4();

        self.db
            .write(move |tx| {
                let payload = payload.clone();
                let value = value.clone();
                Box::pin(async move {
                    check_references(&mut **tx, tutor_id, &payload).await?;

                    sqlx::query(
                        r#"
                        INSERT INTO courses (id, tutor_id, course_category_id, title, description,
                                             class_type, is_free_first_course, expiration_hours, status)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'draft')
                        "#,
                    )
                    .bind(course_id)
                    .bind(tutor_id)
                    .bind(payload.course_category_id)
                    .bind(&payload.title)
                    .bind(&payload.description)
                    .bind(payload.class_type)
                    .bind(payload.is_free_first_course)
                    .bind(payload.expiration_hours.unwrap_or(24))
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(
                        "INSERT INTO course_drafts (id, course_id, tutor_id, payload, status) VALUES ($1, $2, $3, $4, 'draft')",
                    )
                    .bind(Uuid::new_v4())
                    .bind(course_id)
                    .bind(tutor_id)
                    .bind(value)
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                })
            })
            .await?;

        tracing::info!(%course_id, %tutor_id, "Course created");
        self.view(course_id).await
    }

    /// Edits the open draft in place, or forks a new one off the published snapshot.
    pub async fn update(
        &self,
        tutor_id: Uuid,
        course_id: Uuid,
        payload: CoursePayload,
    ) -> Result<CourseView, AppError> {
        let payload = self.prepare(payload)?;
        let value = payload.to_value()?;

        let forked = self
            .db
            .write(move |tx| {
                let payload = payload.clone();
                let value = value.clone();
                Box::pin(async move {
                    let course = find_course(&mut **tx, course_id, true).await?;
                    owned_live(&course, tutor_id)?;
                    check_references(&mut **tx, tutor_id, &payload).await?;

                    let forked = match open_draft(&mut **tx, course_id, true).await? {
                        Some(draft) if draft.status == DraftStatus::PendingApproval => {
                            return Err(AppError::conflict(
                                codes::INVALID_STATE_TRANSITION,
                                "Course is waiting for approval and cannot be edited",
                            ));
                        }
                        Some(draft) => {
                            sqlx::query(
                                "UPDATE course_drafts SET payload = $2, status = 'draft', updated_at = NOW() WHERE id = $1",
                            )
                            .bind(draft.id)
                            .bind(value)
                            .execute(&mut **tx)
                            .await?;
                            false
                        }
                        None => {
                            sqlx::query(
                                "INSERT INTO course_drafts (id, course_id, tutor_id, payload, status) VALUES ($1, $2, $3, $4, 'draft')",
                            )
                            .bind(Uuid::new_v4())
                            .bind(course_id)
                            .bind(tutor_id)
                            .bind(value)
                            .execute(&mut **tx)
                            .await?;
                            true
                        }
                    };

                    sqlx::query("UPDATE courses SET status = 'draft', updated_at = NOW() WHERE id = $1")
                        .bind(course_id)
                        .execute(&mut **tx)
                        .await?;
                    Ok(forked)
                })
            })
            .await
            .map_err(duplicate_draft)?;

        tracing::info!(%course_id, forked, "Course draft saved");
        self.view(course_id).await
    }

    pub async fn submit(&self, tutor_id: Uuid, course_id: Uuid) -> Result<CourseView, AppError> {
        let title = self
            .db
            .write(move |tx| {
                Box::pin(async move {
                    let course = find_course(&mut **tx, course_id, true).await?;
                    owned_live(&course, tutor_id)?;

                    let draft = match open_draft(&mut **tx, course_id, true).await? {
                        Some(draft) if draft.status == DraftStatus::Draft => draft,
                        Some(draft) if draft.status == DraftStatus::Rejected => {
                            return Err(AppError::conflict(
                                codes::INVALID_STATE_TRANSITION,
                                "Edit the rejected draft before submitting it again",
                            ));
                        }
                        Some(_) => {
                            return Err(AppError::conflict(
                                codes::INVALID_STATE_TRANSITION,
                                "Course is already waiting for approval",
                            ));
                        }
                        None => {
                            return Err(AppError::conflict(
                                codes::INVALID_STATE_TRANSITION,
                                "Course has no unpublished changes to submit",
                            ));
                        }
                    };

                    sqlx::query(
                        "UPDATE course_drafts SET status = 'pending_approval', submitted_at = NOW(), updated_at = NOW() WHERE id = $1",
                    )
                    .bind(draft.id)
                    .execute(&mut **tx)
                    .await?;
                    sqlx::query(
                        "UPDATE courses SET status = 'waiting_for_approval', updated_at = NOW() WHERE id = $1",
                    )
                    .bind(course_id)
                    .execute(&mut **tx)
                    .await?;

                    Ok(CoursePayload::from_value(&draft.payload)?.title)
                })
            })
            .await?;

        tracing::info!(%course_id, "Course submitted for approval");
        self.notifier.dispatch_admins(
            Notice::new(
                Uuid::nil(),
                NotificationKind::Course,
                "Course waiting for approval",
                format!("\"{}\" was submitted for review", title),
            )
            .link(self.notifier.url(&format!("admin/courses/{}", course_id)))
            .email(EmailTemplate::CourseSubmitted, json!({ "course": title })),
        );
        self.view(course_id).await
    }

    pub async fn approve(
        &self,
        admin_user_id: Uuid,
        course_id: Uuid,
        note: Option<String>,
    ) -> Result<CourseView, AppError> {
        self.approve_at(admin_user_id, course_id, note, Utc::now()).await
    }

    pub async fn approve_at(
        &self,
        admin_user_id: Uuid,
        course_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CourseView, AppError> {
        let (tutor_user, title) = self
            .db
            .write(move |tx| {
                let note = note.clone();
                Box::pin(async move {
                    let course = find_course(&mut **tx, course_id, true).await?;
                    if course.deleted_at.is_some() {
                        return Err(AppError::conflict(
                            codes::COURSE_DELETED,
                            "Course was deleted and cannot be approved",
                        ));
                    }

                    let draft = pending_draft(&mut **tx, course_id).await?;
                    let payload = CoursePayload::from_value(&draft.payload)?;
                    payload.check()?;
                    check_references(&mut **tx, course.tutor_id, &payload).await?;

                    publish(&mut **tx, course_id, &payload, now).await?;

                    sqlx::query(
                        r#"
                        UPDATE course_drafts
                        SET status = 'approved', reviewed_by = $2, reviewed_at = $3, review_note = $4, updated_at = $3
                        WHERE id = $1
                        "#,
                    )
                    .bind(draft.id)
                    .bind(admin_user_id)
                    .bind(now)
                    .bind(note)
                    .execute(&mut **tx)
                    .await?;

                    let tutor_user = tutor_user_id(&mut **tx, course.tutor_id).await?;
                    Ok((tutor_user, payload.title))
                })
            })
            .await?;

        tracing::info!(%course_id, %admin_user_id, "Course draft approved");
        self.notifier.dispatch(vec![Notice::new(
            tutor_user,
            NotificationKind::Course,
            "Course approved",
            format!("\"{}\" is now published", title),
        )
        .link(self.notifier.url(&format!("tutor/courses/{}", course_id)))
        .email(EmailTemplate::CourseApproved, json!({ "course": title }))]);

        self.view(course_id).await
    }

    pub async fn reject(
        &self,
        admin_user_id: Uuid,
        course_id: Uuid,
        note: String,
    ) -> Result<CourseView, AppError> {
        let note = note.trim().to_string();
        if note.is_empty() {
            return Err(AppError::Validation("note: a rejection reason is required".to_string()));
        }

        let (tutor_user, title, note) = self
            .db
            .write(move |tx| {
                let note = note.clone();
                Box::pin(async move {
                    let course = find_course(&mut **tx, course_id, true).await?;
                    if course.deleted_at.is_some() {
                        return Err(AppError::conflict(
                            codes::COURSE_DELETED,
                            "Course was deleted and cannot be rejected",
                        ));
                    }
                    let draft = pending_draft(&mut **tx, course_id).await?;

                    sqlx::query(
                        r#"
                        UPDATE course_drafts
                        SET status = 'rejected', reviewed_by = $2, reviewed_at = NOW(), review_note = $3, updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(draft.id)
                    .bind(admin_user_id)
                    .bind(&note)
                    .execute(&mut **tx)
                    .await?;
                    sqlx::query("UPDATE courses SET status = 'rejected', updated_at = NOW() WHERE id = $1")
                        .bind(course_id)
                        .execute(&mut **tx)
                        .await?;

                    let tutor_user = tutor_user_id(&mut **tx, course.tutor_id).await?;
                    let title = CoursePayload::from_value(&draft.payload)
                        .map(|p| p.title)
                        .unwrap_or(course.title);
                    Ok((tutor_user, title, note))
                })
            })
            .await?;

        tracing::info!(%course_id, %admin_user_id, "Course draft rejected");
        self.notifier.dispatch(vec![Notice::new(
            tutor_user,
            NotificationKind::Course,
            "Course needs changes",
            format!("\"{}\" was not approved: {}", title, note),
        )
        .link(self.notifier.url(&format!("tutor/courses/{}", course_id)))
        .email(
            EmailTemplate::CourseRejected,
            json!({ "course": title, "note": note }),
        )]);

        self.view(course_id).await
    }

    /// Soft delete. Published content disappears from the catalogue immediately.
    pub async fn delete(&self, tutor_id: Uuid, course_id: Uuid) -> Result<(), AppError> {
        self.db
            .write(move |tx| {
                Box::pin(async move {
                    let course = find_course(&mut **tx, course_id, true).await?;
                    owned_live(&course, tutor_id)?;
                    sqlx::query("UPDATE courses SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
                        .bind(course_id)
                        .execute(&mut **tx)
                        .await?;
                    Ok(())
                })
            })
            .await?;

        tracing::info!(%course_id, %tutor_id, "Course deleted");
        Ok(())
    }

    pub async fn working_view(&self, tutor_id: Uuid, course_id: Uuid) -> Result<CourseView, AppError> {
        let mut conn = self.db.reader().acquire().await?;
        let course = find_course(&mut conn, course_id, false).await?;
        owned_live(&course, tutor_id)?;
        build_view(&mut conn, course).await
    }

    pub async fn list_for_tutor(
        &self,
        tutor_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<TutorCourseSummary>, i64), AppError> {
        let rows = sqlx::query_as::<_, TutorCourseSummary>(
            r#"
            SELECT c.id, COALESCE(d.payload->>'title', c.title) AS title, c.status,
                   d.status AS draft_status, c.published_at, c.updated_at,
                   COUNT(*) OVER() AS total_count
            FROM courses c
            LEFT JOIN course_drafts d ON d.course_id = c.id AND d.status <> 'approved'
            WHERE c.tutor_id = $1 AND c.deleted_at IS NULL
            ORDER BY c.updated_at DESC, c.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tutor_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.db.reader())
        .await?;

        let total = rows.first().map(|r| r.total_count).unwrap_or(0);
        Ok((rows, total))
    }

    /// Admin review queue, oldest submission first.
    pub async fn pending_drafts(&self, page: Pagination) -> Result<(Vec<PendingDraft>, i64), AppError> {
        let rows = sqlx::query_as::<_, PendingDraft>(
            r#"
            SELECT d.id AS draft_id, d.course_id, d.tutor_id, u.name AS tutor_name,
                   COALESCE(d.payload->>'title', c.title) AS title, d.submitted_at,
                   c.published_at IS NOT NULL AS is_update,
                   COUNT(*) OVER() AS total_count
            FROM course_drafts d
            JOIN courses c ON c.id = d.course_id
            JOIN tutors t ON t.id = d.tutor_id
            JOIN users u ON u.id = t.user_id
            WHERE d.status = 'pending_approval' AND c.deleted_at IS NULL
            ORDER BY d.submitted_at, d.id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.db.reader())
        .await?;

        let total = rows.first().map(|r| r.total_count).unwrap_or(0);
        Ok((rows, total))
    }

    pub async fn draft_history(&self, course_id: Uuid) -> Result<Vec<CourseDraft>, AppError> {
        let drafts = sqlx::query_as::<_, CourseDraft>(
            "SELECT * FROM course_drafts WHERE course_id = $1 ORDER BY created_at DESC",
        )
        .bind(course_id)
        .fetch_all(self.db.reader())
        .await?;

        if drafts.is_empty() {
            return Err(AppError::not_found("Course"));
        }
        Ok(drafts)
    }
}

async fn pending_draft(conn: &mut PgConnection, course_id: Uuid) -> Result<CourseDraft, AppError> {
    match open_draft(conn, course_id, true).await? {
        Some(draft) if draft.status == DraftStatus::PendingApproval => Ok(draft),
        _ => Err(AppError::conflict(
            codes::INVALID_STATE_TRANSITION,
            "Course has no draft waiting for approval",
        )),
    }
}
