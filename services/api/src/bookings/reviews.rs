use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;
use validator::Validate;

use lesprivate_common::{codes, AppError, NotificationKind};
use lesprivate_database::Review;

use super::{load_parties, BookingCoordinator};
use crate::notifier::Notice;
use crate::templates::EmailTemplate;

/// `student` reviews are written by the student about the tutor and feed the
/// tutor's rating; `tutor` reviews are written by the tutor about the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Student,
    Tutor,
}

impl ReviewKind {
    fn table(&self) -> &'static str {
        match self {
            ReviewKind::Student => "student_reviews",
            ReviewKind::Tutor => "tutor_reviews",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub rate: Option<i16>,
    #[validate(length(max = 2000, message = "is too long"))]
    pub review: Option<String>,
}

impl ReviewInput {
    fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        if self.rate.is_none() && self.review.is_none() {
            return Err(AppError::Validation("rate: provide a rating or a review".to_string()));
        }
        Ok(())
    }
}

/// Recomputes the tutor's rating from surviving, rated student reviews.
pub(crate) async fn recompute_rating(conn: &mut PgConnection, tutor_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE tutors t
        SET rating = COALESCE(agg.rating, 0), total_reviews = agg.total, updated_at = NOW()
        FROM (
            SELECT ROUND(AVG(rate)::numeric, 2) AS rating, COUNT(*)::int AS total
            FROM student_reviews
            WHERE tutor_id = $1 AND deleted_at IS NULL AND rate IS NOT NULL
        ) agg
        WHERE t.id = $1
        "#,
    )
    .bind(tutor_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn lock_review(
    conn: &mut PgConnection,
    kind: ReviewKind,
    predicate: &str,
    id: Uuid,
) -> Result<Review, AppError> {
    sqlx::query_as::<_, Review>(&format!(
        "SELECT * FROM {} WHERE {} = $1 AND deleted_at IS NULL FOR UPDATE",
        kind.table(),
        predicate
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Review"))
}

async fn write_review(
    conn: &mut PgConnection,
    kind: ReviewKind,
    review_id: Uuid,
    input: &ReviewInput,
    mark_submitted: bool,
) -> Result<Review, AppError> {
    let review = sqlx::query_as::<_, Review>(&format!(
        r#"
        UPDATE {}
        SET rate = COALESCE($2, rate), review = COALESCE($3, review),
            is_submitted = is_submitted OR $4, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
        kind.table()
    ))
    .bind(review_id)
    .bind(input.rate)
    .bind(input.review.as_deref().map(str::trim))
    .bind(mark_submitted)
    .fetch_one(&mut *conn)
    .await?;
    Ok(review)
}

impl BookingCoordinator {
    /// Author edit of their own review for `booking_id`. `author_id` is the
    /// student profile id for [`ReviewKind::Student`], the tutor's otherwise.
    pub async fn edit_review(
        &self,
        kind: ReviewKind,
        author_id: Uuid,
        booking_id: Uuid,
        input: ReviewInput,
    ) -> Result<Review, AppError> {
        self.edit_review_at(kind, author_id, booking_id, input, Utc::now()).await
    }

    pub async fn edit_review_at(
        &self,
        kind: ReviewKind,
        author_id: Uuid,
        booking_id: Uuid,
        input: ReviewInput,
        now: DateTime<Utc>,
    ) -> Result<Review, AppError> {
        input.check()?;

        let (review, first_submit, parties) = self
            .db
            .write(move |tx| {
                let input = input.clone();
                Box::pin(async move {
                    let current = lock_review(&mut **tx, kind, "booking_id", booking_id).await?;
                    let owner = match kind {
                        ReviewKind::Student => current.student_id,
                        ReviewKind::Tutor => current.tutor_id,
                    };
                    if owner != author_id {
                        return Err(AppError::not_found("Review"));
                    }

                    let parties = load_parties(&mut **tx, &[booking_id])
                        .await?
                        .pop()
                        .ok_or_else(|| AppError::not_found("Booking"))?;
                    if now < parties.booking.starts_at {
                        return Err(AppError::conflict(
                            codes::REVIEW_NOT_OPEN,
                            "Reviews open once the lesson has started",
                        ));
                    }

                    let review = write_review(&mut **tx, kind, current.id, &input, true).await?;
                    if kind == ReviewKind::Student {
                        recompute_rating(&mut **tx, review.tutor_id).await?;
                    }
                    Ok((review, !current.is_submitted, parties))
                })
            })
            .await?;

        tracing::info!(
            review_id = %review.id,
            %booking_id,
            kind = kind.table(),
            first_submit,
            "Review saved"
        );

        if first_submit {
            let (recipient, author, path) = match kind {
                ReviewKind::Student => (parties.tutor_user_id, &parties.student_name, "tutor/reviews"),
                ReviewKind::Tutor => (parties.student_user_id, &parties.tutor_name, "student/reviews"),
            };
            self.notifier.dispatch(vec![Notice::new(
                recipient,
                NotificationKind::Review,
                "You received a review",
                format!("{} reviewed booking {}", author, parties.booking.code),
            )
            .once(parties.once(&format!("{}_submitted", kind.table())))
            .link(self.notifier.url(&format!("{}/{}", path, booking_id)))
            .email(
                EmailTemplate::ReviewReceived,
                json!({
                    "author": author,
                    "code": parties.booking.code,
                    "rate": review.rate,
                }),
            )]);
        }

        Ok(review)
    }

    /// Admin override of any review's content.
    pub async fn admin_update_review(
        &self,
        kind: ReviewKind,
        review_id: Uuid,
        input: ReviewInput,
    ) -> Result<Review, AppError> {
        input.check()?;
        let review = self
            .db
            .write(move |tx| {
                let input = input.clone();
                Box::pin(async move {
                    let current = lock_review(&mut **tx, kind, "id", review_id).await?;
                    let review =
                        write_review(&mut **tx, kind, current.id, &input, current.is_submitted).await?;
                    if kind == ReviewKind::Student {
                        recompute_rating(&mut **tx, review.tutor_id).await?;
                    }
                    Ok(review)
                })
            })
            .await?;

        tracing::info!(%review_id, kind = kind.table(), "Review updated by admin");
        Ok(review)
    }

    /// Soft delete; the tutor's rating is recomputed without it.
    pub async fn admin_delete_review(&self, kind: ReviewKind, review_id: Uuid) -> Result<(), AppError> {
        self.db
            .write(move |tx| {
                Box::pin(async move {
                    let current = lock_review(&mut **tx, kind, "id", review_id).await?;
                    sqlx::query(&format!(
                        "UPDATE {} SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1",
                        kind.table()
                    ))
                    .bind(current.id)
                    .execute(&mut **tx)
                    .await?;
                    if kind == ReviewKind::Student {
                        recompute_rating(&mut **tx, current.tutor_id).await?;
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::info!(%review_id, kind = kind.table(), "Review deleted by admin");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_out_of_range_input_is_rejected() {
        assert!(ReviewInput::default().check().is_err());
        let too_high = ReviewInput {
            rate: Some(6),
            review: None,
        };
        assert!(too_high.check().is_err());
        let ok = ReviewInput {
            rate: Some(5),
            review: Some("Clear explanations".to_string()),
        };
        assert!(ok.check().is_ok());
    }

    #[test]
    fn kind_parses_from_path_segment() {
        let kind: ReviewKind = serde_json::from_value(json!("student")).unwrap();
        assert_eq!(kind, ReviewKind::Student);
        assert_eq!(ReviewKind::Tutor.table(), "tutor_reviews");
    }
}
