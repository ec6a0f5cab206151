//! Premium subscriptions reconciled against the payment gateway.
//!
//! Local rows are written first and committed; the gateway is called after
//! that and its webhooks are the only thing that moves a payment out of
//! `pending` or a subscription into `ACTIVE`.

pub mod webhooks;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;
use validator::Validate;

use lesprivate_common::{codes, AppError, SubscriptionStatus};
use lesprivate_database::{Database, Payment, Subscription, SubscriptionPrice};

use crate::config::GatewayConfig;
use crate::gateways::{InvoiceRequest, PaymentGateway, RecurringPlanRequest};
use crate::notifier::Notifier;

pub use webhooks::{WebhookHeaders, WebhookOutcome, WebhookPayload};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
    pub subscription_price_id: Uuid,
    #[validate(url(message = "must be a valid URL"))]
    pub return_url: Option<String>,
    #[serde(default = "default_auto_renew")]
    pub auto_renew: bool,
}

fn default_auto_renew() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub url: String,
    pub reference: String,
    pub invoice_number: String,
    pub payment_id: Uuid,
    pub subscription_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub subscription: Subscription,
    pub plan_name: String,
    pub premium_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct Payer {
    email: String,
}

fn new_reference() -> String {
    format!("lp-sub-{}", Uuid::new_v4().simple())
}

fn new_invoice_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("INV-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Locks a subscription row by our correlation reference.
pub(crate) async fn lock_subscription(
    conn: &mut PgConnection,
    reference_id: &str,
) -> Result<Option<Subscription>, AppError> {
    let subscription = sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE reference_id = $1 FOR UPDATE",
    )
    .bind(reference_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(subscription)
}

#[derive(Clone)]
pub struct SubscriptionReconciler {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
    config: GatewayConfig,
}

impl SubscriptionReconciler {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
        config: GatewayConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            config,
        }
    }

    pub async fn prices(&self) -> Result<Vec<SubscriptionPrice>, AppError> {
        let prices = sqlx::query_as::<_, SubscriptionPrice>(
            "SELECT * FROM subscription_prices WHERE is_active ORDER BY amount",
        )
        .fetch_all(self.db.reader())
        .await?;
        Ok(prices)
    }

    pub async fn list_for_student(&self, student_id: Uuid) -> Result<Vec<SubscriptionView>, AppError> {
        let rows = sqlx::query_as::<_, SubscriptionView>(
            r#"
            SELECT sub.*, p.name AS plan_name, s.premium_until
            FROM subscriptions sub
            JOIN subscription_prices p ON p.id = sub.subscription_price_id
            JOIN students s ON s.id = sub.student_id
            WHERE sub.student_id = $1
            ORDER BY sub.created_at DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(self.db.reader())
        .await?;
        Ok(rows)
    }

    /// Records a pending payment (and a PENDING subscription when renewing
    /// automatically), then opens the hosted checkout at the gateway.
    pub async fn initiate(&self, student_id: Uuid, input: CheckoutInput) -> Result<CheckoutSession, AppError> {
        input.validate()?;
        let now = Utc::now();
        let reference = new_reference();
        let invoice_number = new_invoice_number(now);
        let currency = self.config.currency.clone();

        let (payment, subscription_id, price, payer) = self
            .db
            .write({
                let reference = reference.clone();
                let invoice_number = invoice_number.clone();
                let input = input.clone();
                move |tx| {
                    let reference = reference.clone();
                    let invoice_number = invoice_number.clone();
                    let currency = currency.clone();
                    let input = input.clone();
                    Box::pin(async move {
                        // Serializes concurrent checkouts for the same student.
                        let payer = sqlx::query_as::<_, Payer>(
                            r#"
                            SELECT u.email FROM students s JOIN users u ON u.id = s.user_id
                            WHERE s.id = $1 FOR UPDATE OF s
                            "#,
                        )
                        .bind(student_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| AppError::not_found("Student"))?;

                        let active = sqlx::query_scalar::<_, bool>(
                            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE student_id = $1 AND status = 'ACTIVE')",
                        )
                        .bind(student_id)
                        .fetch_one(&mut **tx)
                        .await?;
                        if active {
                            return Err(AppError::conflict(
                                codes::ALREADY_SUBSCRIBED,
                                "You already have an active subscription",
                            ));
                        }

                        let price = sqlx::query_as::<_, SubscriptionPrice>(
                            "SELECT * FROM subscription_prices WHERE id = $1 AND is_active",
                        )
                        .bind(input.subscription_price_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or_else(|| AppError::not_found("Subscription price"))?;

                        let payment = sqlx::query_as::<_, Payment>(
                            r#"
                            INSERT INTO payments
                                (id, student_id, subscription_price_id, reference_id, invoice_number,
                                 amount, currency, billing_interval, status)
                            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
                            RETURNING *
                            "#,
                        )
                        .bind(Uuid::new_v4())
                        .bind(student_id)
                        .bind(price.id)
                        .bind(&reference)
                        .bind(&invoice_number)
                        .bind(price.amount)
                        .bind(&currency)
                        .bind(price.billing_interval)
                        .fetch_one(&mut **tx)
                        .await?;

                        let subscription_id = if input.auto_renew {
                            let id = Uuid::new_v4();
                            sqlx::query(
                                r#"
                                INSERT INTO subscriptions (id, student_id, subscription_price_id, reference_id, status)
                                VALUES ($1, $2, $3, $4, 'PENDING')
                                "#,
                            )
                            .bind(id)
                            .bind(student_id)
                            .bind(price.id)
                            .bind(&reference)
                            .execute(&mut **tx)
                            .await?;
                            Some(id)
                        } else {
                            None
                        };

                        Ok((payment, subscription_id, price, payer))
                    })
                }
            })
            .await?;

        let success_url = input
            .return_url
            .clone()
            .unwrap_or_else(|| self.config.success_redirect_url.clone());
        let invoice = InvoiceRequest {
            reference_id: reference.clone(),
            invoice_number: invoice_number.clone(),
            amount: price.amount,
            currency: payment.currency.clone(),
            description: format!("Lesprivate Premium: {}", price.name),
            payer_email: payer.email.clone(),
            success_redirect_url: success_url.clone(),
            failure_redirect_url: self.config.failure_redirect_url.clone(),
        };

        let session = match self.gateway.create_invoice(&invoice).await {
            Ok(session) => session,
            Err(err) => {
                let err = AppError::from(err);
                self.abandon(&reference, &err).await;
                return Err(err);
            }
        };

        let plan_id = if subscription_id.is_some() {
            let plan = RecurringPlanRequest {
                reference_id: reference.clone(),
                customer_email: payer.email.clone(),
                amount: price.amount,
                currency: payment.currency.clone(),
                interval: price.billing_interval,
                interval_count: price.interval_count,
                description: format!("Lesprivate Premium: {}", price.name),
                success_return_url: success_url,
                failure_return_url: self.config.failure_redirect_url.clone(),
            };
            match self.gateway.create_recurring_plan(&plan).await {
                Ok(plan) => Some(plan.plan_id),
                Err(err) => {
                    let err = AppError::from(err);
                    self.abandon(&reference, &err).await;
                    return Err(err);
                }
            }
        } else {
            None
        };

        sqlx::query("UPDATE payments SET external_id = $2, url = $3, updated_at = NOW() WHERE id = $1")
            .bind(payment.id)
            .bind(&session.external_id)
            .bind(&session.url)
            .execute(self.db.writer())
            .await?;
        if let (Some(id), Some(plan_id)) = (subscription_id, &plan_id) {
            sqlx::query("UPDATE subscriptions SET external_plan_id = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(plan_id)
                .execute(self.db.writer())
                .await?;
        }

        tracing::info!(
            payment_id = %payment.id,
            reference_id = %reference,
            %student_id,
            auto_renew = subscription_id.is_some(),
            "Checkout session opened"
        );

        Ok(CheckoutSession {
            url: session.url,
            reference,
            invoice_number,
            payment_id: payment.id,
            subscription_id,
        })
    }

    /// Marks a checkout that never reached the gateway as failed.
    async fn abandon(&self, reference: &str, cause: &AppError) {
        let owned = reference.to_string();
        let reason = cause.to_string();
        let result = self
            .db
            .write(move |tx| {
                let reference = owned.clone();
                let reason = reason.clone();
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        UPDATE payments SET status = 'failed', failure_reason = $2, updated_at = NOW()
                        WHERE reference_id = $1 AND status = 'pending'
                        "#,
                    )
                    .bind(&reference)
                    .bind(&reason)
                    .execute(&mut **tx)
                    .await?;
                    sqlx::query(
                        r#"
                        UPDATE subscriptions SET status = 'CANCELLED', cancelled_at = NOW(), updated_at = NOW()
                        WHERE reference_id = $1 AND status = 'PENDING'
                        "#,
                    )
                    .bind(&reference)
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                })
            })
            .await;

        match result {
            Ok(()) => tracing::warn!(reference_id = %reference, error = %cause, "Checkout abandoned"),
            Err(e) => tracing::error!(error = %e, "Could not mark abandoned checkout"),
        }
    }

    /// Deactivates the plan at the gateway, then cancels locally. Paid time is kept.
    pub async fn cancel(&self, student_id: Uuid, subscription_id: Uuid) -> Result<Subscription, AppError> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE id = $1 AND student_id = $2",
        )
        .bind(subscription_id)
        .bind(student_id)
        .fetch_optional(self.db.writer())
        .await?
        .ok_or_else(|| AppError::not_found("Subscription"))?;

        if !subscription.status.can_transition_to(SubscriptionStatus::Cancelled) {
            return Err(AppError::conflict(
                codes::INVALID_STATE_TRANSITION,
                format!("Subscription is already {}", subscription.status.as_str()),
            ));
        }

        if let Some(plan_id) = &subscription.external_plan_id {
            self.gateway.deactivate_plan(plan_id).await?;
        }

        let cancelled = self
            .db
            .write(move |tx| {
                Box::pin(async move {
                    let current = sqlx::query_as::<_, Subscription>(
                        "SELECT * FROM subscriptions WHERE id = $1 FOR UPDATE",
                    )
                    .bind(subscription_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    if current.status == SubscriptionStatus::Cancelled {
                        return Ok(current);
                    }
                    if !current.status.can_transition_to(SubscriptionStatus::Cancelled) {
                        return Err(AppError::conflict(
                            codes::INVALID_STATE_TRANSITION,
                            format!("Subscription is already {}", current.status.as_str()),
                        ));
                    }
                    let cancelled = sqlx::query_as::<_, Subscription>(
                        r#"
                        UPDATE subscriptions SET status = 'CANCELLED', cancelled_at = NOW(), updated_at = NOW()
                        WHERE id = $1
                        RETURNING *
                        "#,
                    )
                    .bind(subscription_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    Ok(cancelled)
                })
            })
            .await?;

        tracing::info!(%subscription_id, %student_id, "Subscription cancelled");
        Ok(cancelled)
    }
}

/// Adds `months` to whichever is later of `current` and `now`.
pub fn extend_premium(current: Option<DateTime<Utc>>, now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let base = current.filter(|until| *until > now).unwrap_or(now);
    base.checked_add_months(chrono::Months::new(months)).unwrap_or(base)
}
