//! Wallet data model.
//!
//! One wallet per user. Balances are cents and are mutated exclusively by
//! the wallet ledger service, which pairs every balance change with a
//! transaction row inside one database transaction. The cached balance and
//! the ledger must therefore always agree.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const WALLET_ACTIVE: &str = "active";
pub const WALLET_SUSPENDED: &str = "suspended";
pub const WALLET_FROZEN: &str = "frozen";

/// A wallet row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance_cents: i64,
    pub currency: String,
    pub total_earned_cents: i64,
    pub total_spent_cents: i64,
    pub total_topup_cents: i64,
    pub reserved_cents: i64,
    pub pending_cents: i64,
    pub daily_spent_cents: i64,
    pub monthly_spent_cents: i64,
    pub daily_limit_cents: i64,
    pub monthly_limit_cents: i64,
    pub last_spend_reset: NaiveDate,
    pub status: String,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Balance not promised to anything else. Debits check against this,
    /// never the raw balance.
    pub fn available_cents(&self) -> i64 {
        self.balance_cents - self.reserved_cents - self.pending_cents
    }
}

/// Daily/monthly spend counters carried across a debit, rolled over when
/// the calendar day or month has changed since the last debit.
///
/// Returned counters are the values *before* adding the new debit.
pub fn rolled_spend_counters(
    daily_spent_cents: i64,
    monthly_spent_cents: i64,
    last_reset: NaiveDate,
    today: NaiveDate,
) -> (i64, i64) {
    if last_reset == today {
        return (daily_spent_cents, monthly_spent_cents);
    }
    let same_month = (last_reset.year(), last_reset.month()) == (today.year(), today.month());
    let monthly = if same_month { monthly_spent_cents } else { 0 };
    (0, monthly)
}

/// Wallet view returned to its owner.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub id: Uuid,
    pub balance_cents: i64,
    pub available_cents: i64,
    pub currency: String,
    pub total_earned_cents: i64,
    pub total_spent_cents: i64,
    pub total_topup_cents: i64,
    pub daily_spent_cents: i64,
    pub monthly_spent_cents: i64,
    pub daily_limit_cents: i64,
    pub monthly_limit_cents: i64,
    pub status: String,
}

impl From<Wallet> for WalletResponse {
    fn from(w: Wallet) -> Self {
        Self {
            id: w.id,
            available_cents: w.available_cents(),
            balance_cents: w.balance_cents,
            currency: w.currency,
            total_earned_cents: w.total_earned_cents,
            total_spent_cents: w.total_spent_cents,
            total_topup_cents: w.total_topup_cents,
            daily_spent_cents: w.daily_spent_cents,
            monthly_spent_cents: w.monthly_spent_cents,
            daily_limit_cents: w.daily_limit_cents,
            monthly_limit_cents: w.monthly_limit_cents,
            status: w.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn counters_carry_within_the_same_day() {
        let (daily, monthly) = rolled_spend_counters(500, 9_000, date(2025, 3, 10), date(2025, 3, 10));
        assert_eq!((daily, monthly), (500, 9_000));
    }

    #[test]
    fn daily_counter_resets_on_a_new_day() {
        let (daily, monthly) = rolled_spend_counters(500, 9_000, date(2025, 3, 10), date(2025, 3, 11));
        assert_eq!((daily, monthly), (0, 9_000));
    }

    #[test]
    fn both_counters_reset_on_a_new_month() {
        let (daily, monthly) = rolled_spend_counters(500, 9_000, date(2025, 3, 31), date(2025, 4, 1));
        assert_eq!((daily, monthly), (0, 0));
    }

    #[test]
    fn year_boundary_is_a_month_change() {
        let (daily, monthly) =
            rolled_spend_counters(500, 9_000, date(2024, 12, 31), date(2025, 1, 1));
        assert_eq!((daily, monthly), (0, 0));
    }

    #[test]
    fn available_balance_subtracts_holds() {
        let mut w = Wallet {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            balance_cents: 10_000,
            currency: "SDG".into(),
            total_earned_cents: 0,
            total_spent_cents: 0,
            total_topup_cents: 0,
            reserved_cents: 2_000,
            pending_cents: 500,
            daily_spent_cents: 0,
            monthly_spent_cents: 0,
            daily_limit_cents: 1_000_000,
            monthly_limit_cents: 5_000_000,
            last_spend_reset: date(2025, 3, 10),
            status: WALLET_ACTIVE.into(),
            last_transaction_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(w.available_cents(), 7_500);
        w.reserved_cents = 0;
        w.pending_cents = 0;
        assert_eq!(w.available_cents(), 10_000);
    }
}
