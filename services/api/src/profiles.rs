use uuid::Uuid;

use lesprivate_common::AppError;
use lesprivate_database::Database;

/// Resolves the role profile behind an authenticated user.
#[derive(Clone)]
pub struct Profiles {
    db: Database,
}

impl Profiles {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn student_id(&self, user_id: Uuid) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM students WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(self.db.reader())
            .await?
            .ok_or_else(|| AppError::Authorization("Student profile required".to_string()))
    }

    pub async fn tutor_id(&self, user_id: Uuid) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM tutors WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(self.db.reader())
            .await?
            .ok_or_else(|| AppError::Authorization("Tutor profile required".to_string()))
    }
}
