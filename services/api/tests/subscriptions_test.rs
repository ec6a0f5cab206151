mod common;

use std::sync::atomic::Ordering;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use lesprivate_api::subscriptions::{CheckoutInput, WebhookHeaders, WebhookOutcome, WebhookPayload};
use lesprivate_common::{codes, AppError, PaymentStatus, SubscriptionStatus};

use common::{setup, student, CALLBACK_TOKEN};

async fn monthly_price(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO subscription_prices (id, name, billing_interval, interval_count, amount)
         VALUES ($1, $2, 'monthly', 1, 99000)",
    )
    .bind(id)
    .bind(format!("Premium {}", id))
    .execute(pool)
    .await
    .unwrap();
    id
}

fn headers(webhook_id: &str) -> WebhookHeaders {
    WebhookHeaders {
        callback_token: Some(CALLBACK_TOKEN.to_string()),
        webhook_id: Some(webhook_id.to_string()),
    }
}

fn succeeded(reference: &str) -> WebhookPayload {
    serde_json::from_value(json!({
        "event": "payment.succeeded",
        "data": { "id": "py_1", "reference_id": reference, "status": "SUCCEEDED" }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_payment_webhook_replay_is_a_no_op() {
    let Some(app) = setup().await else { return };
    let student = student(&app.pool).await;
    let price_id = monthly_price(&app.pool).await;

    let session = app
        .state
        .subscriptions
        .initiate(
            student.profile_id,
            CheckoutInput {
                subscription_price_id: price_id,
                return_url: None,
                auto_renew: true,
            },
        )
        .await
        .unwrap();
    assert!(session.url.ends_with(&session.reference));
    assert!(session.subscription_id.is_some());
    assert_eq!(app.gateway.invoices.load(Ordering::SeqCst), 1);
    assert_eq!(app.gateway.plans.load(Ordering::SeqCst), 1);

    let first_id = format!("wh-{}", Uuid::new_v4());
    let outcome = app
        .state
        .subscriptions
        .handle_webhook(headers(&first_id), succeeded(&session.reference))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let premium_after_first: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT premium_until FROM students WHERE id = $1")
            .bind(student.profile_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert!(premium_after_first.is_some());

    let same_delivery = app
        .state
        .subscriptions
        .handle_webhook(headers(&first_id), succeeded(&session.reference))
        .await
        .unwrap();
    assert_eq!(same_delivery, WebhookOutcome::Duplicate);

    let redelivered = app
        .state
        .subscriptions
        .handle_webhook(headers(&format!("wh-{}", Uuid::new_v4())), succeeded(&session.reference))
        .await
        .unwrap();
    assert_eq!(redelivered, WebhookOutcome::Replayed);

    let payment_status: PaymentStatus =
        sqlx::query_scalar("SELECT status FROM payments WHERE reference_id = $1")
            .bind(&session.reference)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(payment_status, PaymentStatus::Paid);

    let subscription_status: SubscriptionStatus =
        sqlx::query_scalar("SELECT status FROM subscriptions WHERE reference_id = $1")
            .bind(&session.reference)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(subscription_status, SubscriptionStatus::Active);

    let premium_after_replays: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT premium_until FROM students WHERE id = $1")
            .bind(student.profile_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(premium_after_replays, premium_after_first);

    // A late failure for a paid invoice is outside the status map and only acknowledged.
    let failed: WebhookPayload = serde_json::from_value(json!({
        "event": "payment.failed",
        "data": { "reference_id": session.reference, "failure_code": "CARD_DECLINED" }
    }))
    .unwrap();
    let outcome = app
        .state
        .subscriptions
        .handle_webhook(headers(&format!("wh-{}", Uuid::new_v4())), failed)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    let second_checkout = app
        .state
        .subscriptions
        .initiate(
            student.profile_id,
            CheckoutInput {
                subscription_price_id: price_id,
                return_url: None,
                auto_renew: false,
            },
        )
        .await;
    assert!(matches!(second_checkout, Err(AppError::Conflict { code, .. }) if code == codes::ALREADY_SUBSCRIBED));
}

#[tokio::test]
async fn test_webhook_with_wrong_token_or_unknown_reference_is_refused() {
    let Some(app) = setup().await else { return };

    let forged = WebhookHeaders {
        callback_token: Some("not-the-token".to_string()),
        webhook_id: None,
    };
    let result = app
        .state
        .subscriptions
        .handle_webhook(forged, succeeded("lp-sub-unknown"))
        .await;
    assert!(matches!(result, Err(AppError::Authentication(_))));

    let result = app
        .state
        .subscriptions
        .handle_webhook(
            headers(&format!("wh-{}", Uuid::new_v4())),
            succeeded(&format!("lp-sub-{}", Uuid::new_v4().simple())),
        )
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_cancelling_keeps_premium_until() {
    let Some(app) = setup().await else { return };
    let student = student(&app.pool).await;
    let price_id = monthly_price(&app.pool).await;

    let session = app
        .state
        .subscriptions
        .initiate(
            student.profile_id,
            CheckoutInput {
                subscription_price_id: price_id,
                return_url: Some("https://lesprivate.test/premium".to_string()),
                auto_renew: true,
            },
        )
        .await
        .unwrap();
    app.state
        .subscriptions
        .handle_webhook(headers(&format!("wh-{}", Uuid::new_v4())), succeeded(&session.reference))
        .await
        .unwrap();

    let subscription_id = session.subscription_id.unwrap();
    let cancelled = app
        .state
        .subscriptions
        .cancel(student.profile_id, subscription_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert_eq!(app.gateway.deactivations.load(Ordering::SeqCst), 1);

    let premium_until: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT premium_until FROM students WHERE id = $1")
            .bind(student.profile_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert!(premium_until.unwrap() > chrono::Utc::now());
}

#[tokio::test]
async fn test_paid_invoice_on_a_cancelled_plan_grants_no_premium() {
    let Some(app) = setup().await else { return };
    let student = student(&app.pool).await;
    let price_id = monthly_price(&app.pool).await;

    let session = app
        .state
        .subscriptions
        .initiate(
            student.profile_id,
            CheckoutInput {
                subscription_price_id: price_id,
                return_url: None,
                auto_renew: true,
            },
        )
        .await
        .unwrap();

    let plan_cancelled: WebhookPayload = serde_json::from_value(json!({
        "event": "recurring.plan.cancelled",
        "data": { "id": "repl_1", "reference_id": session.reference }
    }))
    .unwrap();
    let outcome = app
        .state
        .subscriptions
        .handle_webhook(headers(&format!("wh-{}", Uuid::new_v4())), plan_cancelled)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let outcome = app
        .state
        .subscriptions
        .handle_webhook(headers(&format!("wh-{}", Uuid::new_v4())), succeeded(&session.reference))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let payment_status: PaymentStatus =
        sqlx::query_scalar("SELECT status FROM payments WHERE reference_id = $1")
            .bind(&session.reference)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(payment_status, PaymentStatus::Paid);

    let (status, end_date): (SubscriptionStatus, Option<chrono::DateTime<chrono::Utc>>) =
        sqlx::query_as("SELECT status, end_date FROM subscriptions WHERE reference_id = $1")
            .bind(&session.reference)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(status, SubscriptionStatus::Cancelled);
    assert!(end_date.is_none());

    let premium_until: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT premium_until FROM students WHERE id = $1")
            .bind(student.profile_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert!(premium_until.is_none());
}
