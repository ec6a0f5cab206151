use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use lesprivate_common::{codes, AppError, NotificationKind, Pagination};
use lesprivate_database::{Database, Notification};

#[derive(Debug, Clone)]
pub struct NewNotification {
    /// Fixed ids make re-enqueueing the same event a no-op.
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub link: Option<String>,
    pub deletable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFilter {
    pub is_read: Option<bool>,
    pub is_dismissed: Option<bool>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// Durable per-user in-app notifications.
#[derive(Clone)]
pub struct NotificationQueue {
    db: Database,
    retention: Duration,
}

impl NotificationQueue {
    pub fn new(db: Database, retention_days: i64) -> Self {
        Self {
            db,
            retention: Duration::days(retention_days.max(1)),
        }
    }

    /// Returns `None` when a notification with the same id already exists.
    pub async fn enqueue(&self, notification: NewNotification) -> Result<Option<Uuid>, AppError> {
        let id = notification.id.unwrap_or_else(Uuid::new_v4);
        let inserted = sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, message, kind, link, is_deleteable)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind)
        .bind(&notification.link)
        .bind(notification.deletable)
        .execute(self.db.writer())
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(None);
        }
        tracing::debug!(notification_id = %id, user_id = %notification.user_id, "Notification enqueued");
        Ok(Some(id))
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        filter: &NotificationFilter,
        page: Pagination,
    ) -> Result<(Vec<Notification>, i64), AppError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT *, COUNT(*) OVER() AS total_count FROM notifications WHERE user_id = ");
        query.push_bind(user_id);

        if !filter.include_deleted {
            query.push(" AND deleted_at IS NULL");
        }
        if let Some(is_read) = filter.is_read {
            query.push(" AND is_read = ").push_bind(is_read);
        }
        if let Some(is_dismissed) = filter.is_dismissed {
            query.push(" AND is_dismissed = ").push_bind(is_dismissed);
        }
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows: Vec<NotificationRow> = query.build_query_as().fetch_all(self.db.reader()).await?;
        let total = rows.first().map(|r| r.total_count).unwrap_or(0);
        Ok((rows.into_iter().map(|r| r.notification).collect(), total))
    }

    async fn owned(&self, user_id: Uuid, id: Uuid) -> Result<Notification, AppError> {
        let notification = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(self.db.writer())
        .await?
        .ok_or_else(|| AppError::not_found("Notification"))?;

        if notification.user_id != user_id {
            return Err(AppError::Authorization(
                "Notification belongs to another user".to_string(),
            ));
        }
        Ok(notification)
    }

    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<(), AppError> {
        self.owned(user_id, id).await?;
        sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.db.writer())
            .await?;
        Ok(())
    }

    pub async fn mark_dismissed(&self, user_id: Uuid, id: Uuid) -> Result<(), AppError> {
        self.owned(user_id, id).await?;
        sqlx::query("UPDATE notifications SET is_dismissed = TRUE, is_read = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.db.writer())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), AppError> {
        let notification = self.owned(user_id, id).await?;
        if !notification.is_deleteable {
            return Err(AppError::conflict(
                codes::NOT_DELETEABLE,
                "This notification cannot be deleted",
            ));
        }

        sqlx::query("UPDATE notifications SET deleted_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.db.writer())
            .await?;
        Ok(())
    }

    /// Drops dismissed notifications older than the retention horizon.
    pub async fn retain(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let cutoff = now - self.retention;
        let deleted = sqlx::query("DELETE FROM notifications WHERE is_dismissed AND created_at < $1")
            .bind(cutoff)
            .execute(self.db.writer())
            .await?
            .rows_affected();

        if deleted > 0 {
            tracing::info!(deleted, "Pruned dismissed notifications");
        }
        Ok(deleted)
    }

    pub async fn admin_user_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT r.user_id FROM user_roles r
            JOIN users u ON u.id = r.user_id
            WHERE r.role = 'admin' AND u.deleted_at IS NULL
            "#,
        )
        .fetch_all(self.db.reader())
        .await?;
        Ok(ids)
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    #[sqlx(flatten)]
    notification: Notification,
    total_count: i64,
}
