//! Wallet ledger - the only code allowed to mutate wallet balances.
//!
//! Every mutation is a single atomic unit of {wallet row update,
//! transaction row insert}: the wallet row is locked with `FOR UPDATE`,
//! the balance-before/after pair is captured under that lock, and both
//! writes commit together or not at all. Concurrent debits against one
//! wallet serialize on the row lock, so no debit ever reads a stale
//! balance.
//!
//! # Invariants
//!
//! - `balance >= 0` and `balance >= reserved + pending` at every commit
//! - a debit never crosses the daily or monthly spend cap
//! - the running sum of transaction deltas reconstructs the balance
//! - amounts are always positive; direction lives in the transaction type

use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::transaction::{Transaction, TransactionRefs, TransactionType};
use crate::models::wallet::{
    WALLET_ACTIVE, WALLET_FROZEN, WALLET_SUSPENDED, Wallet, rolled_spend_counters,
};

/// Load a wallet by owner.
pub async fn get_wallet(pool: &DbPool, user_id: Uuid) -> Result<Wallet, AppError> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::WalletNotFound)
}

/// Page through a wallet's ledger, newest first.
pub async fn list_transactions(
    pool: &DbPool,
    user_id: Uuid,
    page: i64,
    per_page: i64,
) -> Result<Vec<Transaction>, AppError> {
    let wallet = get_wallet(pool, user_id).await?;
    let per_page = per_page.clamp(1, 100);
    let offset = (page.max(1) - 1) * per_page;

    let rows = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE wallet_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(wallet.id)
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

fn wallet_status_guard(wallet: &Wallet) -> Result<(), AppError> {
    match wallet.status.as_str() {
        WALLET_ACTIVE => Ok(()),
        WALLET_FROZEN => Err(AppError::WalletFrozen),
        WALLET_SUSPENDED => Err(AppError::WalletSuspended),
        other => {
            tracing::error!(wallet_id = %wallet.id, status = other, "unknown wallet status");
            Err(AppError::WalletSuspended)
        }
    }
}

fn positive_amount_guard(amount_cents: i64) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Lock a wallet row for the rest of the enclosing transaction.
async fn lock_wallet(conn: &mut PgConnection, user_id: Uuid) -> Result<Wallet, AppError> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::WalletNotFound)
}

async fn insert_transaction(
    conn: &mut PgConnection,
    wallet: &Wallet,
    transaction_type: TransactionType,
    amount_cents: i64,
    balance_after_cents: i64,
    description: Option<&str>,
    external_ref: Option<&str>,
    reversal_of: Option<Uuid>,
    refs: TransactionRefs,
) -> Result<Transaction, AppError> {
    let row = sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            wallet_id, user_id, transaction_type, amount_cents,
            balance_before_cents, balance_after_cents,
            description, external_ref, trip_id, payment_id,
            counterparty_user_id, reversal_of
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(wallet.id)
    .bind(wallet.user_id)
    .bind(transaction_type.as_str())
    .bind(amount_cents)
    .bind(wallet.balance_cents)
    .bind(balance_after_cents)
    .bind(description)
    .bind(external_ref)
    .bind(refs.trip_id)
    .bind(refs.payment_id)
    .bind(refs.counterparty_user_id)
    .bind(reversal_of)
    .fetch_one(conn)
    .await?;

    // Fatal invariant: the committed row must reconstruct the balance
    // change exactly. A mismatch aborts the whole unit.
    if row.balance_before_cents + row.signed_delta() != row.balance_after_cents {
        return Err(AppError::Invariant(
            "transaction delta does not reconstruct the balance",
        ));
    }

    Ok(row)
}

/// Debit leg, composable into a larger atomic unit.
///
/// `transaction_type` must be debit-like (`Debit`, `TripPayment`,
/// `Commission`). Checks available balance and both spend caps under the
/// row lock; rolls the period counters over when the calendar moved on.
pub async fn debit_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount_cents: i64,
    transaction_type: TransactionType,
    description: Option<&str>,
    refs: TransactionRefs,
) -> Result<Transaction, AppError> {
    debug_assert_eq!(transaction_type.direction(), -1);
    positive_amount_guard(amount_cents)?;

    let wallet = lock_wallet(conn, user_id).await?;
    wallet_status_guard(&wallet)?;

    if wallet.available_cents() < amount_cents {
        return Err(AppError::InsufficientFunds);
    }

    let today = Utc::now().date_naive();
    let (daily_spent, monthly_spent) = rolled_spend_counters(
        wallet.daily_spent_cents,
        wallet.monthly_spent_cents,
        wallet.last_spend_reset,
        today,
    );

    if daily_spent + amount_cents > wallet.daily_limit_cents
        || monthly_spent + amount_cents > wallet.monthly_limit_cents
    {
        return Err(AppError::LimitExceeded);
    }

    let balance_after = wallet.balance_cents - amount_cents;

    sqlx::query(
        r#"
        UPDATE wallets
        SET balance_cents = $2,
            total_spent_cents = total_spent_cents + $3,
            daily_spent_cents = $4,
            monthly_spent_cents = $5,
            last_spend_reset = $6,
            last_transaction_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(wallet.id)
    .bind(balance_after)
    .bind(amount_cents)
    .bind(daily_spent + amount_cents)
    .bind(monthly_spent + amount_cents)
    .bind(today)
    .execute(&mut *conn)
    .await?;

    insert_transaction(
        conn,
        &wallet,
        transaction_type,
        amount_cents,
        balance_after,
        description,
        None,
        None,
        refs,
    )
    .await
}

/// Credit leg, composable into a larger atomic unit.
///
/// `transaction_type` must be credit-like; trip earnings and top-ups also
/// feed their cumulative totals on the wallet row.
#[allow(clippy::too_many_arguments)]
pub async fn credit_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount_cents: i64,
    transaction_type: TransactionType,
    description: Option<&str>,
    external_ref: Option<&str>,
    reversal_of: Option<Uuid>,
    refs: TransactionRefs,
) -> Result<Transaction, AppError> {
    debug_assert_eq!(transaction_type.direction(), 1);
    positive_amount_guard(amount_cents)?;

    let wallet = lock_wallet(conn, user_id).await?;
    wallet_status_guard(&wallet)?;

    let balance_after = wallet.balance_cents + amount_cents;
    let earned = if transaction_type == TransactionType::TripEarning {
        amount_cents
    } else {
        0
    };
    let topped_up = if transaction_type == TransactionType::Topup {
        amount_cents
    } else {
        0
    };

    sqlx::query(
        r#"
        UPDATE wallets
        SET balance_cents = $2,
            total_earned_cents = total_earned_cents + $3,
            total_topup_cents = total_topup_cents + $4,
            last_transaction_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(wallet.id)
    .bind(balance_after)
    .bind(earned)
    .bind(topped_up)
    .execute(&mut *conn)
    .await?;

    insert_transaction(
        conn,
        &wallet,
        transaction_type,
        amount_cents,
        balance_after,
        description,
        external_ref,
        reversal_of,
        refs,
    )
    .await
}

/// Debit a wallet (standalone atomic unit).
pub async fn debit(
    pool: &DbPool,
    user_id: Uuid,
    amount_cents: i64,
    description: Option<&str>,
    refs: TransactionRefs,
) -> Result<Transaction, AppError> {
    let mut tx = pool.begin().await?;
    let row = debit_tx(
        &mut tx,
        user_id,
        amount_cents,
        TransactionType::Debit,
        description,
        refs,
    )
    .await?;
    tx.commit().await?;
    Ok(row)
}

/// Credit a wallet (standalone atomic unit).
pub async fn credit(
    pool: &DbPool,
    user_id: Uuid,
    amount_cents: i64,
    description: Option<&str>,
    refs: TransactionRefs,
) -> Result<Transaction, AppError> {
    let mut tx = pool.begin().await?;
    let row = credit_tx(
        &mut tx,
        user_id,
        amount_cents,
        TransactionType::Credit,
        description,
        None,
        None,
        refs,
    )
    .await?;
    tx.commit().await?;
    Ok(row)
}

/// Top up a wallet from an external payment, idempotent on `external_ref`.
///
/// A repeated gateway callback with the same reference returns the
/// original transaction instead of crediting twice. The partial unique
/// index on `(external_ref) WHERE type = 'topup'` closes the race two
/// concurrent callbacks would otherwise win together.
pub async fn top_up(
    pool: &DbPool,
    user_id: Uuid,
    amount_cents: i64,
    external_ref: &str,
) -> Result<Transaction, AppError> {
    positive_amount_guard(amount_cents)?;
    if external_ref.is_empty() {
        return Err(AppError::InvalidRequest(
            "external_ref must not be empty".to_string(),
        ));
    }

    if let Some(existing) = find_topup(pool, external_ref).await? {
        return Ok(existing);
    }

    let mut tx = pool.begin().await?;
    let result = credit_tx(
        &mut tx,
        user_id,
        amount_cents,
        TransactionType::Topup,
        Some("wallet top-up"),
        Some(external_ref),
        None,
        TransactionRefs::default(),
    )
    .await;

    match result {
        Ok(row) => {
            tx.commit().await?;
            Ok(row)
        }
        Err(AppError::Database(e)) if is_unique_violation(&e) => {
            // Lost the race to a concurrent callback with the same ref.
            tx.rollback().await?;
            find_topup(pool, external_ref)
                .await?
                .ok_or(AppError::Database(e))
        }
        Err(e) => Err(e),
    }
}

async fn find_topup(pool: &DbPool, external_ref: &str) -> Result<Option<Transaction>, AppError> {
    let row = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE transaction_type = 'topup' AND external_ref = $1",
    )
    .bind(external_ref)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Refund part or all of an original debit back to its wallet.
///
/// The original row is locked so concurrent refunds of the same debit
/// serialize; the cumulative refunded amount may never exceed the
/// original.
pub async fn refund(
    pool: &DbPool,
    original_transaction_id: Uuid,
    amount_cents: i64,
    description: Option<&str>,
    refs: TransactionRefs,
) -> Result<Transaction, AppError> {
    let mut tx = pool.begin().await?;
    let row = refund_tx(&mut tx, original_transaction_id, amount_cents, description, refs).await?;
    tx.commit().await?;
    Ok(row)
}

/// Refund leg, composable into a larger atomic unit.
pub async fn refund_tx(
    conn: &mut PgConnection,
    original_transaction_id: Uuid,
    amount_cents: i64,
    description: Option<&str>,
    refs: TransactionRefs,
) -> Result<Transaction, AppError> {
    positive_amount_guard(amount_cents)?;

    // Lock the original row; refunds of one debit run one at a time.
    let original = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
    )
    .bind(original_transaction_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::InvalidRequest("original transaction not found".to_string()))?;

    let original_type = TransactionType::parse(&original.transaction_type);
    if original_type.map(|t| t.direction()) != Some(-1) {
        return Err(AppError::InvalidRequest(
            "only debits can be refunded".to_string(),
        ));
    }

    let already_refunded = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM transactions WHERE reversal_of = $1",
    )
    .bind(original.id)
    .fetch_one(&mut *conn)
    .await?;

    if already_refunded + amount_cents > original.amount_cents {
        return Err(AppError::RefundExceedsOriginal);
    }

    credit_tx(
        conn,
        original.user_id,
        amount_cents,
        TransactionType::Refund,
        description,
        None,
        Some(original.id),
        refs,
    )
    .await
}

/// Move money between two wallets as one atomic unit.
///
/// The debit and the credit commit together; if the credit leg fails (a
/// frozen destination, say) the debit is rolled back and never observable.
pub async fn transfer(
    pool: &DbPool,
    from_user_id: Uuid,
    to_user_id: Uuid,
    amount_cents: i64,
    description: Option<&str>,
) -> Result<(Transaction, Transaction), AppError> {
    if from_user_id == to_user_id {
        return Err(AppError::InvalidRequest(
            "Cannot transfer to the same wallet".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let debit_row = debit_tx(
        &mut tx,
        from_user_id,
        amount_cents,
        TransactionType::Debit,
        description,
        TransactionRefs {
            counterparty_user_id: Some(to_user_id),
            ..Default::default()
        },
    )
    .await?;

    let credit_row = credit_tx(
        &mut tx,
        to_user_id,
        amount_cents,
        TransactionType::Credit,
        description,
        None,
        None,
        TransactionRefs {
            counterparty_user_id: Some(from_user_id),
            ..Default::default()
        },
    )
    .await?;

    tx.commit().await?;
    Ok((debit_row, credit_row))
}
