use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::prelude::ToPrimitive;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use lesprivate_common::{AppError, SubscriptionInterval};

use super::{
    GatewayError, InvoiceRequest, InvoiceSession, PaymentGateway, RecurringPlan,
    RecurringPlanRequest,
};
use crate::config::GatewayConfig;

#[derive(Clone)]
pub struct XenditGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct XenditInvoice {
    id: String,
    invoice_url: String,
}

#[derive(Debug, Deserialize)]
struct XenditPlan {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct XenditErrorBody {
    error_code: Option<String>,
    message: Option<String>,
}

impl XenditGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, AppError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            timeout,
        })
    }

    /// Xendit uses the secret key as the basic-auth user with an empty password.
    fn auth_header(&self) -> String {
        let credentials = format!("{}:", self.secret_key);
        format!("Basic {}", general_purpose::STANDARD.encode(credentials.as_bytes()))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", self.auth_header())
            .timeout(self.timeout)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.send().await.map_err(classify)?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<XenditErrorBody>(&body)
        .ok()
        .and_then(|e| match (e.error_code, e.message) {
            (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
            (code, message) => code.or(message),
        })
        .unwrap_or(body);

    Err(GatewayError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn schedule_interval(interval: SubscriptionInterval, count: i32) -> (&'static str, u32) {
    ("MONTH", interval.months(count))
}

#[async_trait]
impl PaymentGateway for XenditGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<InvoiceSession, GatewayError> {
        let amount = request
            .amount
            .to_f64()
            .ok_or_else(|| GatewayError::Decode("amount out of range".to_string()))?;

        let body = json!({
            "external_id": request.reference_id,
            "amount": amount,
            "currency": request.currency,
            "description": request.description,
            "payer_email": request.payer_email,
            "success_redirect_url": request.success_redirect_url,
            "failure_redirect_url": request.failure_redirect_url,
            "items": [{ "name": request.invoice_number, "quantity": 1, "price": amount }],
        });

        let invoice: XenditInvoice = Self::send(self.post("/v2/invoices").json(&body)).await?;
        tracing::info!(reference_id = %request.reference_id, external_id = %invoice.id, "Invoice created");

        Ok(InvoiceSession {
            external_id: invoice.id,
            url: invoice.invoice_url,
        })
    }

    async fn create_recurring_plan(
        &self,
        request: &RecurringPlanRequest,
    ) -> Result<RecurringPlan, GatewayError> {
        let amount = request
            .amount
            .to_f64()
            .ok_or_else(|| GatewayError::Decode("amount out of range".to_string()))?;
        let (interval, interval_count) = schedule_interval(request.interval, request.interval_count);

        let body = json!({
            "reference_id": request.reference_id,
            "recurring_action": "PAYMENT",
            "currency": request.currency,
            "amount": amount,
            "description": request.description,
            "notification_config": { "recurring_created": ["EMAIL"], "recurring_succeeded": ["EMAIL"], "recurring_failed": ["EMAIL"] },
            "customer_email": request.customer_email,
            "schedule": {
                "reference_id": request.reference_id,
                "interval": interval,
                "interval_count": interval_count,
            },
            "success_return_url": request.success_return_url,
            "failure_return_url": request.failure_return_url,
        });

        let plan: XenditPlan = Self::send(self.post("/recurring/plans").json(&body)).await?;
        tracing::info!(reference_id = %request.reference_id, plan_id = %plan.id, "Recurring plan created");

        Ok(RecurringPlan {
            plan_id: plan.id,
            status: plan.status,
        })
    }

    async fn deactivate_plan(&self, plan_id: &str) -> Result<(), GatewayError> {
        let path = format!("/recurring/plans/{}/deactivate", plan_id);
        let response = self.post(&path).send().await.map_err(classify)?;
        check_status(response).await?;
        tracing::info!(plan_id, "Recurring plan deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn gateway(base_url: String, timeout_secs: u64) -> XenditGateway {
        XenditGateway::new(&GatewayConfig {
            base_url,
            secret_key: "xnd_development_secret".to_string(),
            callback_token: "token".to_string(),
            currency: "IDR".to_string(),
            timeout_secs,
            success_redirect_url: "https://app/success".to_string(),
            failure_redirect_url: "https://app/failed".to_string(),
        })
        .unwrap()
    }

    fn invoice_request() -> InvoiceRequest {
        InvoiceRequest {
            reference_id: "ref-1".to_string(),
            invoice_number: "INV/20300101/ABCD1234".to_string(),
            amount: Decimal::new(99_000, 0),
            currency: "IDR".to_string(),
            description: "Premium monthly".to_string(),
            payer_email: "student@example.com".to_string(),
            success_redirect_url: "https://app/success".to_string(),
            failure_redirect_url: "https://app/failed".to_string(),
        }
    }

    #[test]
    fn basic_auth_uses_key_with_empty_password() {
        let gateway = gateway("http://localhost".to_string(), 5);
        let expected = general_purpose::STANDARD.encode("xnd_development_secret:");
        assert_eq!(gateway.auth_header(), format!("Basic {}", expected));
    }

    #[test]
    fn yearly_plans_bill_in_months() {
        assert_eq!(schedule_interval(SubscriptionInterval::Yearly, 1), ("MONTH", 12));
        assert_eq!(schedule_interval(SubscriptionInterval::Monthly, 3), ("MONTH", 3));
    }

    #[tokio::test]
    async fn invoice_returns_hosted_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/invoices")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".to_string()))
            .match_body(mockito::Matcher::PartialJson(json!({ "external_id": "ref-1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"inv_123","invoice_url":"https://checkout.xendit.co/inv_123","status":"PENDING"}"#)
            .create_async()
            .await;

        let session = gateway(server.url(), 5)
            .create_invoice(&invoice_request())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.external_id, "inv_123");
        assert_eq!(session.url, "https://checkout.xendit.co/inv_123");
    }

    #[tokio::test]
    async fn rejection_carries_provider_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/invoices")
            .with_status(400)
            .with_body(r#"{"error_code":"API_VALIDATION_ERROR","message":"amount is required"}"#)
            .create_async()
            .await;

        let err = gateway(server.url(), 5)
            .create_invoice(&invoice_request())
            .await
            .unwrap_err();

        match &err {
            GatewayError::Rejected { status, message } => {
                assert_eq!(*status, 400);
                assert_eq!(message, "API_VALIDATION_ERROR: amount is required");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(AppError::from(err).status_code(), 502);
    }

    #[tokio::test]
    async fn deactivate_hits_plan_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/recurring/plans/repl_1/deactivate")
            .with_status(200)
            .with_body(r#"{"id":"repl_1","status":"INACTIVE"}"#)
            .create_async()
            .await;

        gateway(server.url(), 5).deactivate_plan("repl_1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        // Port 9 (discard) is closed on test hosts.
        let err = gateway("http://127.0.0.1:9".to_string(), 2)
            .deactivate_plan("repl_1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_) | GatewayError::Timeout));
    }
}
