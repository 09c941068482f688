//! Payment data model and API types.
//!
//! At most one live payment per trip, enforced by the unique index on
//! `trip_id`. `amount = platform_commission + driver_earnings` always.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a trip is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Cash,
    Ebs,
    Cyberpay,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Ebs => "ebs",
            PaymentMethod::Cyberpay => "cyberpay",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wallet" => Some(PaymentMethod::Wallet),
            "cash" => Some(PaymentMethod::Cash),
            "ebs" => Some(PaymentMethod::Ebs),
            "cyberpay" => Some(PaymentMethod::Cyberpay),
            _ => None,
        }
    }

    /// Gateway methods settle through the external charge API.
    pub fn is_gateway(&self) -> bool {
        matches!(self, PaymentMethod::Ebs | PaymentMethod::Cyberpay)
    }
}

/// Settlement states.
///
/// `Processing` means the idempotency gate is held but no money has moved.
/// `Failed` is retryable for gateway methods until the attempt cap, then
/// terminal; wallet-method failures are terminal immediately (collections
/// surface, not auto-retried).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }

    /// Terminal states stop the settlement orchestrator from touching the
    /// payment again.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        )
    }
}

/// A payment row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub method: String,
    pub status: String,
    pub amount_cents: i64,
    pub platform_commission_cents: i64,
    pub driver_earnings_cents: i64,
    pub gateway_reference: Option<String>,
    pub gateway_status: Option<String>,
    pub refunded_amount_cents: i64,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::parse(&self.status).unwrap_or(PaymentStatus::Failed)
    }

    pub fn method(&self) -> PaymentMethod {
        PaymentMethod::parse(&self.method).unwrap_or(PaymentMethod::Cash)
    }
}

/// Request body for `POST /api/v1/payments/{id}/refund`.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Amount to refund in cents; omit for a full refund.
    pub amount_cents: Option<i64>,
    pub reason: String,
}

/// Payment view returned to trip parties.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub method: String,
    pub status: String,
    pub amount_cents: i64,
    pub platform_commission_cents: i64,
    pub driver_earnings_cents: i64,
    pub refunded_amount_cents: i64,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            trip_id: p.trip_id,
            method: p.method,
            status: p.status,
            amount_cents: p.amount_cents,
            platform_commission_cents: p.platform_commission_cents,
            driver_earnings_cents: p.driver_earnings_cents,
            refunded_amount_cents: p.refunded_amount_cents,
            failure_reason: p.failure_reason,
            completed_at: p.completed_at,
            created_at: p.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_methods() {
        assert!(PaymentMethod::Ebs.is_gateway());
        assert!(PaymentMethod::Cyberpay.is_gateway());
        assert!(!PaymentMethod::Wallet.is_gateway());
        assert!(!PaymentMethod::Cash.is_gateway());
    }

    #[test]
    fn settled_states_are_terminal() {
        assert!(PaymentStatus::Completed.is_settled());
        assert!(PaymentStatus::Refunded.is_settled());
        assert!(PaymentStatus::PartiallyRefunded.is_settled());
        assert!(!PaymentStatus::Processing.is_settled());
        assert!(!PaymentStatus::Failed.is_settled());
    }

    #[test]
    fn statuses_round_trip_through_text() {
        for s in [
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
            PaymentStatus::PartiallyRefunded,
        ] {
            assert_eq!(PaymentStatus::parse(s.as_str()), Some(s));
        }
    }
}
