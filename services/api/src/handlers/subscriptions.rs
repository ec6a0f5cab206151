use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

use lesprivate_auth::Claims;
use lesprivate_common::{ApiResponse, AppError};
use lesprivate_database::{Subscription, SubscriptionPrice};

use super::student_id;
use crate::subscriptions::{
    CheckoutInput, CheckoutSession, SubscriptionView, WebhookHeaders, WebhookPayload,
};
use crate::AppState;

const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";
const WEBHOOK_ID_HEADER: &str = "webhook-id";

pub async fn prices(State(state): State<AppState>) -> Result<ApiResponse<Vec<SubscriptionPrice>>, AppError> {
    let prices = state.subscriptions.prices().await?;
    Ok(ApiResponse::success(prices))
}

pub async fn checkout(
    State(state): State<AppState>,
    claims: Claims,
    Json(input): Json<CheckoutInput>,
) -> Result<ApiResponse<CheckoutSession>, AppError> {
    let student_id = student_id(&state, &claims).await?;
    let session = state.subscriptions.initiate(student_id, input).await?;
    Ok(ApiResponse::created(session))
}

pub async fn my_subscriptions(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<ApiResponse<Vec<SubscriptionView>>, AppError> {
    let student_id = student_id(&state, &claims).await?;
    let subscriptions = state.subscriptions.list_for_student(student_id).await?;
    Ok(ApiResponse::success(subscriptions))
}

pub async fn cancel(
    State(state): State<AppState>,
    claims: Claims,
    Path(subscription_id): Path<Uuid>,
) -> Result<ApiResponse<Subscription>, AppError> {
    let student_id = student_id(&state, &claims).await?;
    let subscription = state.subscriptions.cancel(student_id, subscription_id).await?;
    Ok(ApiResponse::success(subscription))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Gateway callback. Replays and rejected transitions are still acknowledged.
pub async fn xendit_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Result<ApiResponse<()>, AppError> {
    let headers = WebhookHeaders {
        callback_token: header(&headers, CALLBACK_TOKEN_HEADER),
        webhook_id: header(&headers, WEBHOOK_ID_HEADER),
    };
    let outcome = state.subscriptions.handle_webhook(headers, payload).await?;
    tracing::debug!(?outcome, "Webhook acknowledged");
    Ok(ApiResponse::<()>::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn blank_headers_read_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(CALLBACK_TOKEN_HEADER, HeaderValue::from_static("  "));
        headers.insert(WEBHOOK_ID_HEADER, HeaderValue::from_static("wh_1"));
        assert_eq!(header(&headers, CALLBACK_TOKEN_HEADER), None);
        assert_eq!(header(&headers, WEBHOOK_ID_HEADER).as_deref(), Some("wh_1"));
    }
}
