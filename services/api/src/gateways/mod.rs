pub mod xendit;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use lesprivate_common::{AppError, SubscriptionInterval};

pub use xendit::XenditGateway;

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRequest {
    pub reference_id: String,
    pub invoice_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub payer_email: String,
    pub success_redirect_url: String,
    pub failure_redirect_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceSession {
    pub external_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringPlanRequest {
    pub reference_id: String,
    pub customer_email: String,
    pub amount: Decimal,
    pub currency: String,
    pub interval: SubscriptionInterval,
    pub interval_count: i32,
    pub description: String,
    pub success_return_url: String,
    pub failure_return_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurringPlan {
    pub plan_id: String,
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway did not answer before the deadline")]
    Timeout,
    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => AppError::GatewayTimeout(err.to_string()),
            other => AppError::ExternalService(other.to_string()),
        }
    }
}

/// Hosted checkout and recurring billing at the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<InvoiceSession, GatewayError>;

    async fn create_recurring_plan(
        &self,
        request: &RecurringPlanRequest,
    ) -> Result<RecurringPlan, GatewayError>;

    async fn deactivate_plan(&self, plan_id: &str) -> Result<(), GatewayError>;
}
