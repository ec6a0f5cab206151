use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use lesprivate_common::{codes, AppError, MentorStudentStatus, Pagination};
use lesprivate_database::{Database, MentorStudent};

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;
const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[validate(length(equal = 6, message = "must be 6 characters"))]
    pub code: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LinkedStudent {
    pub student_id: Uuid,
    pub name: String,
    pub email: String,
    pub status: MentorStudentStatus,
    pub joined_at: DateTime<Utc>,
    /// Accepted bookings between this tutor and student.
    pub total_sessions: i64,
    #[serde(skip)]
    pub total_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCode {
    pub code: String,
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Tutor invite codes and the tutor ↔ student links made with them.
#[derive(Clone)]
pub struct MentorStudentLink {
    db: Database,
}

impl MentorStudentLink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the tutor's code, minting one on first use.
    pub async fn invite_code(&self, tutor_id: Uuid) -> Result<InviteCode, AppError> {
        let existing = sqlx::query_scalar::<_, String>(
            "SELECT code FROM mentor_invite_codes WHERE tutor_id = $1",
        )
        .bind(tutor_id)
        .fetch_optional(self.db.writer())
        .await?;
        if let Some(code) = existing {
            return Ok(InviteCode { code });
        }

        for attempt in 1..=CODE_ATTEMPTS {
            let candidate = generate_code();
            let result = sqlx::query(
                "INSERT INTO mentor_invite_codes (tutor_id, code) VALUES ($1, $2) ON CONFLICT (tutor_id) DO NOTHING",
            )
            .bind(tutor_id)
            .bind(&candidate)
            .execute(self.db.writer())
            .await;

            match result {
                Ok(_) => {
                    // A concurrent first call may have won the tutor_id race.
                    let code = sqlx::query_scalar::<_, String>(
                        "SELECT code FROM mentor_invite_codes WHERE tutor_id = $1",
                    )
                    .bind(tutor_id)
                    .fetch_one(self.db.writer())
                    .await?;
                    tracing::info!(%tutor_id, "Invite code issued");
                    return Ok(InviteCode { code });
                }
                Err(err) => {
                    let err = AppError::from(err);
                    if err.sql_state().as_deref() == Some("23505") {
                        tracing::debug!(%tutor_id, attempt, "Invite code collision");
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(AppError::Internal("Could not allocate a unique invite code".to_string()))
    }

    pub async fn join(&self, student_id: Uuid, request: JoinRequest) -> Result<MentorStudent, AppError> {
        let code = normalize_code(&request.code);
        JoinRequest { code: code.clone() }.validate()?;

        let tutor_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT tutor_id FROM mentor_invite_codes WHERE code = $1",
        )
        .bind(&code)
        .fetch_optional(self.db.writer())
        .await?
        .ok_or_else(|| AppError::not_found("Invite code"))?;

        let link = sqlx::query_as::<_, MentorStudent>(
            r#"
            INSERT INTO mentor_students (id, tutor_id, student_id, status)
            VALUES ($1, $2, $3, 'active')
            ON CONFLICT (tutor_id, student_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tutor_id)
        .bind(student_id)
        .fetch_optional(self.db.writer())
        .await?
        .ok_or_else(|| {
            AppError::conflict(codes::ALREADY_LINKED, "You already joined this tutor")
        })?;

        tracing::info!(%tutor_id, %student_id, "Student joined tutor");
        Ok(link)
    }

    pub async fn students(
        &self,
        tutor_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<LinkedStudent>, i64), AppError> {
        let rows = sqlx::query_as::<_, LinkedStudent>(
            r#"
            SELECT ms.student_id, u.name, u.email, ms.status, ms.joined_at,
                   (SELECT COUNT(*) FROM bookings b
                    WHERE b.tutor_id = ms.tutor_id AND b.student_id = ms.student_id
                      AND b.status = 'accepted') AS total_sessions,
                   COUNT(*) OVER() AS total_count
            FROM mentor_students ms
            JOIN students s ON s.id = ms.student_id
            JOIN users u ON u.id = s.user_id
            WHERE ms.tutor_id = $1
            ORDER BY ms.joined_at DESC, ms.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tutor_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.db.reader())
        .await?;

        let total = rows.first().map_or(0, |r| r.total_count);
        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_match_the_column_check() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn join_codes_are_case_insensitive() {
        assert_eq!(normalize_code(" ab12cd "), "AB12CD");
    }
}
