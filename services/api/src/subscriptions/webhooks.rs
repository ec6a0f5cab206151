use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use lesprivate_common::{AppError, NotificationKind, PaymentStatus, SubscriptionStatus};
use lesprivate_database::{Payment, Subscription};

use super::{extend_premium, lock_subscription, SubscriptionReconciler};
use crate::encryption::constant_time_eq;
use crate::notifier::Notice;
use crate::templates::EmailTemplate;

/// Headers the gateway attaches to each delivery.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub callback_token: Option<String>,
    pub webhook_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
    pub id: Option<String>,
    pub reference_id: Option<String>,
    pub status: Option<String>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
}

/// Event envelope. Plain invoice callbacks carry no `event` and put our
/// reference in `external_id` with an upper-case `status` instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    pub event: Option<String>,
    #[serde(default)]
    pub data: WebhookData,
    pub external_id: Option<String>,
    pub status: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookEvent {
    Payment(PaymentStatus),
    Plan(SubscriptionStatus),
    CycleSucceeded,
    Unknown,
}

impl WebhookPayload {
    fn event(&self) -> WebhookEvent {
        match self.event.as_deref() {
            Some("payment.succeeded") => WebhookEvent::Payment(PaymentStatus::Paid),
            Some("payment.failed") => WebhookEvent::Payment(PaymentStatus::Failed),
            Some("payment.cancelled") => WebhookEvent::Payment(PaymentStatus::Cancelled),
            Some("payment.expired") => WebhookEvent::Payment(PaymentStatus::Expired),
            Some("recurring.plan.activated") => WebhookEvent::Plan(SubscriptionStatus::Active),
            Some("recurring.plan.paused") => WebhookEvent::Plan(SubscriptionStatus::Paused),
            Some("recurring.plan.cancelled") | Some("recurring.plan.inactivated") => {
                WebhookEvent::Plan(SubscriptionStatus::Cancelled)
            }
            Some("recurring.cycle.succeeded") => WebhookEvent::CycleSucceeded,
            Some(_) => WebhookEvent::Unknown,
            None => match self.status.as_deref() {
                Some("PAID") | Some("SETTLED") => WebhookEvent::Payment(PaymentStatus::Paid),
                Some("EXPIRED") => WebhookEvent::Payment(PaymentStatus::Expired),
                Some("FAILED") => WebhookEvent::Payment(PaymentStatus::Failed),
                _ => WebhookEvent::Unknown,
            },
        }
    }

    fn event_name(&self) -> String {
        self.event
            .clone()
            .unwrap_or_else(|| format!("invoice.{}", self.status.as_deref().unwrap_or("unknown").to_lowercase()))
    }

    fn reference_id(&self) -> Option<String> {
        self.data
            .reference_id
            .clone()
            .or_else(|| self.external_id.clone())
    }

    fn failure(&self) -> Option<String> {
        self.data
            .failure_reason
            .clone()
            .or_else(|| self.data.failure_code.clone())
            .or_else(|| self.failure_reason.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    /// The row already had the state this event implies.
    Replayed,
    /// A delivery with this idempotency key was processed before.
    Duplicate,
    /// Out-of-map transition or unknown event; acknowledged without a write.
    Ignored,
}

impl WebhookOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Replayed => "replayed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// What to tell the student once the transaction has committed.
enum Followup {
    None,
    PaymentSucceeded {
        payment: Payment,
        user_id: Uuid,
        premium_until: chrono::DateTime<Utc>,
    },
    PaymentFailed {
        payment: Payment,
        user_id: Uuid,
    },
    Renewed {
        subscription: Subscription,
        user_id: Uuid,
        premium_until: chrono::DateTime<Utc>,
    },
}

async fn already_processed(conn: &mut PgConnection, key: &str) -> Result<bool, AppError> {
    let seen = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM payment_webhook_events WHERE webhook_id = $1)",
    )
    .bind(key)
    .fetch_one(&mut *conn)
    .await?;
    Ok(seen)
}

async fn record_delivery(
    conn: &mut PgConnection,
    key: &str,
    event: &str,
    reference_id: &str,
    outcome: WebhookOutcome,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO payment_webhook_events (webhook_id, event, reference_id, outcome)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (webhook_id) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(event)
    .bind(reference_id)
    .bind(outcome.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn student_user_id(conn: &mut PgConnection, student_id: Uuid) -> Result<Uuid, AppError> {
    let user_id = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM students WHERE id = $1")
        .bind(student_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(user_id)
}

/// Pushes `premium_until` forward by `months` and returns the new value.
async fn extend_student_premium(
    conn: &mut PgConnection,
    student_id: Uuid,
    months: u32,
) -> Result<chrono::DateTime<Utc>, AppError> {
    let current = sqlx::query_scalar::<_, Option<chrono::DateTime<Utc>>>(
        "SELECT premium_until FROM students WHERE id = $1 FOR UPDATE",
    )
    .bind(student_id)
    .fetch_one(&mut *conn)
    .await?;

    let until = extend_premium(current, Utc::now(), months);
    sqlx::query("UPDATE students SET premium_until = $2, updated_at = NOW() WHERE id = $1")
        .bind(student_id)
        .bind(until)
        .execute(&mut *conn)
        .await?;
    Ok(until)
}

async fn price_months(conn: &mut PgConnection, subscription_price_id: Uuid) -> Result<u32, AppError> {
    let (interval, count) = sqlx::query_as::<_, (lesprivate_common::SubscriptionInterval, i32)>(
        "SELECT billing_interval, interval_count FROM subscription_prices WHERE id = $1",
    )
    .bind(subscription_price_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(interval.months(count))
}

/// Moves the subscription to `next` when the status map allows it.
async fn transition_subscription(
    conn: &mut PgConnection,
    subscription: &Subscription,
    next: SubscriptionStatus,
) -> Result<WebhookOutcome, AppError> {
    if subscription.status == next {
        return Ok(WebhookOutcome::Replayed);
    }
    if !subscription.status.can_transition_to(next) {
        tracing::warn!(
            reference_id = %subscription.reference_id,
            from = subscription.status.as_str(),
            to = next.as_str(),
            "Subscription transition rejected"
        );
        return Ok(WebhookOutcome::Ignored);
    }

    sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = $2,
            start_date = CASE WHEN $2 = 'ACTIVE' THEN COALESCE(start_date, NOW()) ELSE start_date END,
            cancelled_at = CASE WHEN $2 = 'CANCELLED' THEN NOW() ELSE cancelled_at END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(subscription.id)
    .bind(next)
    .execute(&mut *conn)
    .await?;
    Ok(WebhookOutcome::Applied)
}

impl SubscriptionReconciler {
    pub fn verify_callback(&self, headers: &WebhookHeaders) -> Result<(), AppError> {
        let presented = headers.callback_token.as_deref().unwrap_or_default();
        if presented.is_empty()
            || !constant_time_eq(presented.as_bytes(), self.config.callback_token.as_bytes())
        {
            return Err(AppError::Authentication("Invalid callback token".to_string()));
        }
        Ok(())
    }

    /// Applies one gateway delivery. Unknown references are 404; every other
    /// outcome is acknowledged so the gateway stops retrying.
    pub async fn handle_webhook(
        &self,
        headers: WebhookHeaders,
        payload: WebhookPayload,
    ) -> Result<WebhookOutcome, AppError> {
        self.verify_callback(&headers)?;

        let event = payload.event();
        let event_name = payload.event_name();
        let Some(reference_id) = payload.reference_id() else {
            if event == WebhookEvent::Unknown {
                tracing::info!(event = %event_name, "Ignoring webhook without reference");
                return Ok(WebhookOutcome::Ignored);
            }
            return Err(AppError::Validation("reference_id: missing".to_string()));
        };

        // Renewal cycles repeat the same event and reference, so they need a delivery key.
        let idempotency_key = match event {
            WebhookEvent::CycleSucceeded => headers
                .webhook_id
                .clone()
                .or_else(|| payload.data.id.clone().map(|id| format!("cycle:{}", id))),
            _ => headers.webhook_id.clone(),
        };
        if event == WebhookEvent::CycleSucceeded && idempotency_key.is_none() {
            return Err(AppError::Validation(
                "webhook-id: renewal deliveries need an idempotency key".to_string(),
            ));
        }

        let (outcome, followup) = self
            .db
            .write(move |tx| {
                let payload = payload.clone();
                let reference_id = reference_id.clone();
                let event_name = event_name.clone();
                let key = idempotency_key.clone();
                Box::pin(async move {
                    if let Some(key) = &key {
                        if already_processed(&mut **tx, key).await? {
                            return Ok((WebhookOutcome::Duplicate, Followup::None));
                        }
                    }

                    let (outcome, followup) = match event {
                        WebhookEvent::Payment(next) => {
                            apply_payment(&mut **tx, &reference_id, next, payload.failure()).await?
                        }
                        WebhookEvent::Plan(next) => {
                            let subscription = lock_subscription(&mut **tx, &reference_id)
                                .await?
                                .ok_or_else(|| AppError::not_found("Subscription"))?;
                            (
                                transition_subscription(&mut **tx, &subscription, next).await?,
                                Followup::None,
                            )
                        }
                        WebhookEvent::CycleSucceeded => apply_renewal(&mut **tx, &reference_id).await?,
                        WebhookEvent::Unknown => (WebhookOutcome::Ignored, Followup::None),
                    };

                    if let Some(key) = &key {
                        record_delivery(&mut **tx, key, &event_name, &reference_id, outcome).await?;
                    }
                    Ok((outcome, followup))
                })
            })
            .await?;

        tracing::info!(outcome = outcome.as_str(), "Webhook processed");
        self.follow_up(followup);
        Ok(outcome)
    }

    fn follow_up(&self, followup: Followup) {
        let link = self.notifier.url("student/subscriptions");
        let notice = match followup {
            Followup::None => return,
            Followup::PaymentSucceeded {
                payment,
                user_id,
                premium_until,
            } => Notice::new(
                user_id,
                NotificationKind::Payment,
                "Payment received",
                format!("Premium is active until {}", premium_until.format("%Y-%m-%d")),
            )
            .once(format!("payment:{}:paid", payment.id))
            .email(
                EmailTemplate::PaymentSucceeded,
                json!({
                    "invoice": payment.invoice_number,
                    "currency": payment.currency,
                    "amount": payment.amount.to_string(),
                    "premium_until": premium_until.format("%Y-%m-%d").to_string(),
                }),
            ),
            Followup::PaymentFailed { payment, user_id } => Notice::new(
                user_id,
                NotificationKind::Payment,
                "Payment not completed",
                format!("Payment {} was {}", payment.invoice_number, payment.status.as_str()),
            )
            .once(format!("payment:{}:{}", payment.id, payment.status.as_str()))
            .email(
                EmailTemplate::PaymentFailed,
                json!({
                    "invoice": payment.invoice_number,
                    "currency": payment.currency,
                    "amount": payment.amount.to_string(),
                    "status": payment.status.as_str(),
                }),
            ),
            Followup::Renewed {
                subscription,
                user_id,
                premium_until,
            } => Notice::new(
                user_id,
                NotificationKind::Subscription,
                "Subscription renewed",
                format!("Premium is active until {}", premium_until.format("%Y-%m-%d")),
            )
            .once(format!(
                "subscription:{}:renewed:{}",
                subscription.id,
                premium_until.timestamp()
            )),
        };
        self.notifier.dispatch(vec![notice.link(link)]);
    }
}

async fn apply_payment(
    conn: &mut PgConnection,
    reference_id: &str,
    next: PaymentStatus,
    failure: Option<String>,
) -> Result<(WebhookOutcome, Followup), AppError> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE reference_id = $1 FOR UPDATE",
    )
    .bind(reference_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Payment"))?;

    if payment.status == next {
        tracing::debug!(%reference_id, status = next.as_str(), "Webhook replay");
        return Ok((WebhookOutcome::Replayed, Followup::None));
    }
    if !payment.status.can_transition_to(next) {
        tracing::warn!(
            %reference_id,
            from = payment.status.as_str(),
            to = next.as_str(),
            "Payment transition rejected"
        );
        return Ok((WebhookOutcome::Ignored, Followup::None));
    }

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = $2, failure_reason = $3,
            paid_at = CASE WHEN $2 = 'paid' THEN NOW() ELSE paid_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .bind(next)
    .bind(failure)
    .fetch_one(&mut *conn)
    .await?;

    let user_id = student_user_id(conn, payment.student_id).await?;
    let subscription = lock_subscription(conn, reference_id).await?;

    if next == PaymentStatus::Paid {
        if let Some(subscription) = &subscription {
            let moved = transition_subscription(conn, subscription, SubscriptionStatus::Active).await?;
            if moved == WebhookOutcome::Ignored {
                // The invoice is recorded as paid, but a closed plan grants no premium time.
                tracing::warn!(
                    %reference_id,
                    status = subscription.status.as_str(),
                    "Payment settled for a closed subscription"
                );
                return Ok((WebhookOutcome::Applied, Followup::None));
            }
        }
        let months = price_months(conn, payment.subscription_price_id).await?;
        let premium_until = extend_student_premium(conn, payment.student_id, months).await?;
        if let Some(subscription) = &subscription {
            sqlx::query("UPDATE subscriptions SET end_date = $2 WHERE id = $1")
                .bind(subscription.id)
                .bind(premium_until)
                .execute(&mut *conn)
                .await?;
        }
        tracing::info!(%reference_id, %premium_until, "Payment settled");
        return Ok((
            WebhookOutcome::Applied,
            Followup::PaymentSucceeded {
                payment,
                user_id,
                premium_until,
            },
        ));
    }

    if let Some(subscription) = &subscription {
        let target = if next == PaymentStatus::Failed && subscription.status == SubscriptionStatus::Active {
            SubscriptionStatus::Paused
        } else {
            SubscriptionStatus::Cancelled
        };
        transition_subscription(conn, subscription, target).await?;
    }
    tracing::info!(%reference_id, status = next.as_str(), "Payment closed without settlement");
    Ok((WebhookOutcome::Applied, Followup::PaymentFailed { payment, user_id }))
}

async fn apply_renewal(
    conn: &mut PgConnection,
    reference_id: &str,
) -> Result<(WebhookOutcome, Followup), AppError> {
    let subscription = lock_subscription(conn, reference_id)
        .await?
        .ok_or_else(|| AppError::not_found("Subscription"))?;

    if matches!(
        subscription.status,
        SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
    ) {
        tracing::warn!(%reference_id, status = subscription.status.as_str(), "Renewal for a closed subscription");
        return Ok((WebhookOutcome::Ignored, Followup::None));
    }

    transition_subscription(conn, &subscription, SubscriptionStatus::Active).await?;
    let months = price_months(conn, subscription.subscription_price_id).await?;
    let premium_until = extend_student_premium(conn, subscription.student_id, months).await?;
    sqlx::query("UPDATE subscriptions SET end_date = $2, updated_at = NOW() WHERE id = $1")
        .bind(subscription.id)
        .bind(premium_until)
        .execute(&mut *conn)
        .await?;
    let user_id = student_user_id(conn, subscription.student_id).await?;

    tracing::info!(%reference_id, %premium_until, "Subscription renewed");
    Ok((
        WebhookOutcome::Applied,
        Followup::Renewed {
            subscription,
            user_id,
            premium_until,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn events_map_to_target_states() {
        let p = payload(json!({ "event": "payment.succeeded", "data": { "reference_id": "R1" } }));
        assert_eq!(p.event(), WebhookEvent::Payment(PaymentStatus::Paid));
        assert_eq!(p.reference_id().as_deref(), Some("R1"));

        let p = payload(json!({ "event": "recurring.plan.paused", "data": { "reference_id": "R1" } }));
        assert_eq!(p.event(), WebhookEvent::Plan(SubscriptionStatus::Paused));

        let p = payload(json!({ "event": "something.else" }));
        assert_eq!(p.event(), WebhookEvent::Unknown);
    }

    #[test]
    fn invoice_callbacks_use_external_id_and_status() {
        let p = payload(json!({ "external_id": "R9", "status": "PAID", "id": "inv_1" }));
        assert_eq!(p.event(), WebhookEvent::Payment(PaymentStatus::Paid));
        assert_eq!(p.reference_id().as_deref(), Some("R9"));
        assert_eq!(p.event_name(), "invoice.paid");

        let p = payload(json!({ "external_id": "R9", "status": "EXPIRED" }));
        assert_eq!(p.event(), WebhookEvent::Payment(PaymentStatus::Expired));
    }

    #[test]
    fn failure_reason_prefers_data_fields() {
        let p = payload(json!({
            "event": "payment.failed",
            "data": { "reference_id": "R1", "failure_code": "INSUFFICIENT_BALANCE" }
        }));
        assert_eq!(p.failure().as_deref(), Some("INSUFFICIENT_BALANCE"));
    }
}
