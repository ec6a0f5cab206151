use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use lesprivate_common::{AppError, NotificationKind};
use lesprivate_database::Database;

use crate::email::EmailService;
use crate::notifications::{NewNotification, NotificationQueue};
use crate::templates::{EmailTemplate, TemplateEngine};

const NOTICE_NAMESPACE: Uuid = Uuid::from_u128(0x6c65_7370_7269_7661_7465_6e6f_7469_6365);

/// One user-facing side effect: an in-app notification plus an optional email.
#[derive(Debug, Clone)]
pub struct Notice {
    pub dedupe_key: Option<String>,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub email: Option<(EmailTemplate, Value)>,
}

impl Notice {
    pub fn new(
        user_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            dedupe_key: None,
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            link: None,
            email: None,
        }
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn email(mut self, template: EmailTemplate, data: Value) -> Self {
        self.email = Some((template, data));
        self
    }

    /// Marks the notice as belonging to a one-off event, so delivering it twice is a no-op.
    pub fn once(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Fixed per (event, recipient) when a dedupe key is set.
    pub fn id(&self) -> Option<Uuid> {
        self.dedupe_key.as_ref().map(|key| {
            let name = format!("{}:{}", key, self.user_id);
            Uuid::new_v5(&NOTICE_NAMESPACE, name.as_bytes())
        })
    }

    fn for_user(&self, user_id: Uuid) -> Self {
        Self {
            user_id,
            ..self.clone()
        }
    }
}

/// Fire-and-forget delivery after the owning transaction has committed.
/// Failures are logged and never reach the request that produced them.
#[derive(Clone)]
pub struct Notifier {
    db: Database,
    queue: NotificationQueue,
    email: EmailService,
    templates: TemplateEngine,
    timeout: Duration,
    base_url: String,
}

impl Notifier {
    pub fn new(
        db: Database,
        queue: NotificationQueue,
        email: EmailService,
        templates: TemplateEngine,
        timeout: Duration,
        base_url: String,
    ) -> Self {
        Self {
            db,
            queue,
            email,
            templates,
            timeout,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute link into the web app.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            for notice in notices {
                let user_id = notice.user_id;
                match tokio::time::timeout(notifier.timeout, notifier.deliver(notice)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(%user_id, error = %e, "Notification delivery failed"),
                    Err(_) => tracing::warn!(%user_id, "Notification delivery timed out"),
                }
            }
        });
    }

    /// Sends `notice` to every admin account.
    pub fn dispatch_admins(&self, notice: Notice) {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier.queue.admin_user_ids().await {
                Ok(admins) => {
                    let notices = admins.into_iter().map(|id| notice.for_user(id)).collect();
                    notifier.dispatch(notices);
                }
                Err(e) => tracing::warn!(error = %e, "Could not load admin recipients"),
            }
        });
    }

    async fn deliver(&self, notice: Notice) -> Result<(), AppError> {
        let fresh = self
            .queue
            .enqueue(NewNotification {
                id: notice.id(),
                user_id: notice.user_id,
                title: notice.title.clone(),
                message: notice.message.clone(),
                kind: notice.kind,
                link: notice.link.clone(),
                deletable: true,
            })
            .await?;
        if fresh.is_none() {
            return Ok(());
        }

        let Some((template, data)) = notice.email else {
            return Ok(());
        };
        if !self.email.is_enabled() {
            return Ok(());
        }

        let recipient = sqlx::query_as::<_, (String, String)>(
            "SELECT email, name FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(notice.user_id)
        .fetch_optional(self.db.reader())
        .await?;
        let Some((address, name)) = recipient else {
            return Ok(());
        };

        let mut data = data;
        if let Value::Object(map) = &mut data {
            map.entry("name").or_insert(Value::String(name));
            if let Some(link) = &notice.link {
                map.entry("link").or_insert(Value::String(link.clone()));
            }
        }

        let rendered = self.templates.render(template, &data)?;
        self.email.send(&address, &rendered.subject, &rendered.body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_is_stable_per_user_and_key() {
        let user = Uuid::new_v4();
        let a = Notice::new(user, NotificationKind::Booking, "t", "m").once("booking:1:expired");
        let b = Notice::new(user, NotificationKind::Booking, "t", "m").once("booking:1:expired");
        let c = Notice::new(Uuid::new_v4(), NotificationKind::Booking, "t", "m")
            .once("booking:1:expired");

        assert_eq!(a.id(), b.id());
        assert!(a.id().is_some());
        assert_ne!(a.id(), c.id());
        assert_eq!(Notice::new(user, NotificationKind::Booking, "t", "m").id(), None);
    }
}
