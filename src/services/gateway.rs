//! Payment gateway capability.
//!
//! EBS and CyberPay are opaque charge/refund providers behind one HTTP
//! facade. The trait keeps settlement logic independent of the transport;
//! both calls are idempotent on the caller-supplied correlation id, so a
//! settlement retry can safely repeat them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Result of a successful charge.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    /// Gateway-side reference for reconciliation and refunds.
    pub reference: String,
}

/// External charge/refund provider.
pub trait PaymentGateway {
    fn charge(
        &self,
        amount_cents: i64,
        currency: &str,
        correlation_id: Uuid,
    ) -> impl Future<Output = Result<ChargeOutcome, AppError>> + Send;

    fn refund(
        &self,
        reference: &str,
        amount_cents: i64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    amount_cents: i64,
    currency: &'a str,
    correlation_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    reference: String,
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    reference: &'a str,
    amount_cents: i64,
}

/// HTTP gateway client.
///
/// Every failure is a transient [`AppError::Gateway`]; the settlement
/// orchestrator owns the retry policy.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    fn base(&self) -> Result<&str, AppError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| AppError::Gateway("payment gateway is not configured".into()))
    }
}

impl PaymentGateway for HttpGateway {
    async fn charge(
        &self,
        amount_cents: i64,
        currency: &str,
        correlation_id: Uuid,
    ) -> Result<ChargeOutcome, AppError> {
        let url = format!("{}/charges", self.base()?);
        let response = self
            .client
            .post(&url)
            .json(&ChargeRequest {
                amount_cents,
                currency,
                correlation_id,
            })
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("charge request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "charge rejected with status {}",
                response.status()
            )));
        }

        let body: ChargeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("charge response unreadable: {e}")))?;

        Ok(ChargeOutcome {
            reference: body.reference,
        })
    }

    async fn refund(&self, reference: &str, amount_cents: i64) -> Result<(), AppError> {
        let url = format!("{}/refunds", self.base()?);
        let response = self
            .client
            .post(&url)
            .json(&RefundRequest {
                reference,
                amount_cents,
            })
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("refund request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "refund rejected with status {}",
                response.status()
            )));
        }

        Ok(())
    }
}
