//! Transaction data model: the append-only wallet ledger.
//!
//! A row is immutable once committed. Amounts are always positive; the
//! direction of the balance change is carried by the type, so
//! `balance_after = balance_before + signed_delta()` holds for every row
//! and the running sum of deltas reconstructs the wallet balance exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger entry kinds. Credit-like types raise the balance, debit-like
/// types lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Debit,
    Credit,
    Topup,
    Refund,
    /// Passenger side of a settled trip (debit).
    TripPayment,
    /// Driver side of a settled trip (credit).
    TripEarning,
    /// Driver-side reversal of earnings on a refund (debit).
    Commission,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "debit",
            TransactionType::Credit => "credit",
            TransactionType::Topup => "topup",
            TransactionType::Refund => "refund",
            TransactionType::TripPayment => "trip_payment",
            TransactionType::TripEarning => "trip_earning",
            TransactionType::Commission => "commission",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(TransactionType::Debit),
            "credit" => Some(TransactionType::Credit),
            "topup" => Some(TransactionType::Topup),
            "refund" => Some(TransactionType::Refund),
            "trip_payment" => Some(TransactionType::TripPayment),
            "trip_earning" => Some(TransactionType::TripEarning),
            "commission" => Some(TransactionType::Commission),
            _ => None,
        }
    }

    /// Sign of the balance change this type applies.
    pub fn direction(&self) -> i64 {
        match self {
            TransactionType::Credit
            | TransactionType::Topup
            | TransactionType::Refund
            | TransactionType::TripEarning => 1,
            TransactionType::Debit | TransactionType::TripPayment | TransactionType::Commission => {
                -1
            }
        }
    }
}

/// A committed ledger row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: String,
    pub status: String,
    pub amount_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub description: Option<String>,
    pub external_ref: Option<String>,
    pub trip_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub counterparty_user_id: Option<Uuid>,
    pub reversal_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Signed balance delta of this row.
    pub fn signed_delta(&self) -> i64 {
        let direction = TransactionType::parse(&self.transaction_type)
            .map(|t| t.direction())
            .unwrap_or(0);
        direction * self.amount_cents
    }
}

/// References attached to a ledger entry at write time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionRefs {
    pub trip_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub counterparty_user_id: Option<Uuid>,
}

/// Ledger view returned to the wallet owner.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub transaction_type: String,
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub description: Option<String>,
    pub trip_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            transaction_type: t.transaction_type,
            amount_cents: t.amount_cents,
            balance_after_cents: t.balance_after_cents,
            description: t.description,
            trip_id: t.trip_id,
            created_at: t.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransactionType; 7] = [
        TransactionType::Debit,
        TransactionType::Credit,
        TransactionType::Topup,
        TransactionType::Refund,
        TransactionType::TripPayment,
        TransactionType::TripEarning,
        TransactionType::Commission,
    ];

    #[test]
    fn every_type_has_a_direction() {
        for t in ALL {
            assert_eq!(t.direction().abs(), 1, "{}", t.as_str());
        }
    }

    #[test]
    fn credit_like_types_raise_the_balance() {
        for t in [
            TransactionType::Credit,
            TransactionType::Topup,
            TransactionType::Refund,
            TransactionType::TripEarning,
        ] {
            assert_eq!(t.direction(), 1, "{}", t.as_str());
        }
    }

    #[test]
    fn types_round_trip_through_text() {
        for t in ALL {
            assert_eq!(TransactionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TransactionType::parse("withdrawal"), None);
    }
}
