//! Settlement orchestrator - moves the money for a completed trip.
//!
//! # Idempotency
//!
//! Settling the same trip twice must never move money twice. The gate is
//! the unique index on `payments.trip_id`: a `processing` payment row is
//! inserted before any wallet movement, and the movement plus the
//! `completed` mark commit in one database transaction. Whatever state a
//! crash leaves behind is therefore unambiguous:
//!
//! - no payment row: nothing moved, the sweep re-triggers settlement
//! - `processing`: gate held, nothing moved, settlement resumes
//! - `completed`/`refunded`: money moved, further calls no-op
//! - `failed` (wallet): surfaced for collections, not auto-retried
//! - `failed` (gateway): retried with capped exponential backoff
//!
//! The trip itself stays `completed` through all of it; the ride already
//! happened.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::outbox::{EVENT_PAYMENT_COMPLETED, EVENT_PAYMENT_FAILED, EVENT_PAYMENT_REFUNDED};
use crate::models::payment::{Payment, PaymentMethod, PaymentStatus, RefundRequest};
use crate::models::transaction::{Transaction, TransactionRefs, TransactionType};
use crate::models::trip::{Trip, TripStatus};
use crate::money::{format_sdg, percentage, proportional};
use crate::services::gateway::PaymentGateway;
use crate::services::{outbox_service, wallet_service};
use crate::state::AppState;

/// Settle a completed trip. Idempotent; safe to call from the completion
/// path, the reconciliation sweep, and gateway retries alike.
pub async fn settle_trip(state: &AppState, trip_id: Uuid) -> Result<Payment, AppError> {
    let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
        .bind(trip_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::TripNotFound)?;

    if trip.status() != TripStatus::Completed {
        return Err(AppError::InvalidRequest(
            "only completed trips settle".to_string(),
        ));
    }

    // Actual fare when the driver closed with one, estimate otherwise.
    let fare_cents = trip.settlement_fare_cents();
    let commission_cents = percentage(fare_cents, state.config.commission_rate_bps);
    let earnings_cents = fare_cents - commission_cents;

    // The idempotency gate. ON CONFLICT DO NOTHING keeps concurrent
    // triggers from erroring; both then read the same row back.
    sqlx::query(
        r#"
        INSERT INTO payments (
            trip_id, passenger_id, driver_id, method, status,
            amount_cents, platform_commission_cents, driver_earnings_cents
        )
        VALUES ($1, $2, $3, $4, 'processing', $5, $6, $7)
        ON CONFLICT (trip_id) DO NOTHING
        "#,
    )
    .bind(trip.id)
    .bind(trip.passenger_id)
    .bind(trip.driver_id)
    .bind(trip.payment_method().as_str())
    .bind(fare_cents)
    .bind(commission_cents)
    .bind(earnings_cents)
    .execute(&state.pool)
    .await?;

    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE trip_id = $1")
        .bind(trip.id)
        .fetch_one(&state.pool)
        .await?;

    let status = payment.status();
    if status.is_settled() {
        return Ok(payment);
    }
    if status == PaymentStatus::Failed {
        let retryable = payment.method().is_gateway()
            && payment.retry_count < state.config.max_settlement_attempts;
        if !retryable {
            return Ok(payment);
        }
    }

    match payment.method() {
        PaymentMethod::Wallet => settle_wallet(state, &trip, &payment).await,
        PaymentMethod::Cash => settle_cash(state, &payment).await,
        PaymentMethod::Ebs | PaymentMethod::Cyberpay => settle_gateway(state, &trip, &payment).await,
    }
}

/// Wallet path: debit the passenger the full fare and credit the driver
/// their earnings as one atomic unit together with the `completed` mark.
async fn settle_wallet(
    state: &AppState,
    trip: &Trip,
    payment: &Payment,
) -> Result<Payment, AppError> {
    let driver_id = trip
        .driver_id
        .ok_or_else(|| AppError::InvalidRequest("completed trip has no driver".to_string()))?;

    let refs = TransactionRefs {
        trip_id: Some(trip.id),
        payment_id: Some(payment.id),
        counterparty_user_id: Some(driver_id),
    };

    let mut tx = state.pool.begin().await?;

    let description = format!("trip fare {}", format_sdg(payment.amount_cents));
    let moved = async {
        wallet_service::debit_tx(
            &mut tx,
            trip.passenger_id,
            payment.amount_cents,
            TransactionType::TripPayment,
            Some(&description),
            refs,
        )
        .await?;

        wallet_service::credit_tx(
            &mut tx,
            driver_id,
            payment.driver_earnings_cents,
            TransactionType::TripEarning,
            Some("trip earnings"),
            None,
            None,
            TransactionRefs {
                counterparty_user_id: Some(trip.passenger_id),
                ..refs
            },
        )
        .await?;

        Ok::<(), AppError>(())
    }
    .await;

    match moved {
        Ok(()) => {
            let completed = sqlx::query_as::<_, Payment>(
                r#"
                UPDATE payments
                SET status = 'completed', processed_at = NOW(), completed_at = NOW(),
                    failure_reason = NULL, updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(payment.id)
            .fetch_one(&mut *tx)
            .await?;

            enqueue_outcome(&mut tx, &completed, EVENT_PAYMENT_COMPLETED).await?;
            tx.commit().await?;
            Ok(completed)
        }
        Err(e @ (AppError::InsufficientFunds
        | AppError::LimitExceeded
        | AppError::WalletFrozen
        | AppError::WalletSuspended
        | AppError::WalletNotFound)) => {
            // Resource failure: no transaction rows survive, the trip stays
            // completed, and the payment is surfaced for collections.
            drop(tx);
            let failed = mark_failed(&state.pool, payment.id, e.code(), None).await?;
            tracing::warn!(
                payment_id = %payment.id,
                trip_id = %trip.id,
                reason = e.code(),
                "wallet settlement failed"
            );
            Ok(failed)
        }
        Err(e) => Err(e),
    }
}

/// Cash path: the fare changed hands in the car. The payment completes
/// immediately; the commission stays on the row for reconciliation with
/// the driver out-of-band.
async fn settle_cash(state: &AppState, payment: &Payment) -> Result<Payment, AppError> {
    let mut tx = state.pool.begin().await?;

    let completed = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = 'completed', processed_at = NOW(), completed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(completed) = completed else {
        // Another settle call beat us; re-read and return its outcome.
        return reload(&state.pool, payment.id).await;
    };

    enqueue_outcome(&mut tx, &completed, EVENT_PAYMENT_COMPLETED).await?;
    tx.commit().await?;
    Ok(completed)
}

/// Gateway path: the passenger's money comes from EBS/CyberPay, so only
/// the driver's earnings move through the platform wallet. The charge is
/// idempotent on the payment id.
async fn settle_gateway(
    state: &AppState,
    trip: &Trip,
    payment: &Payment,
) -> Result<Payment, AppError> {
    let driver_id = trip
        .driver_id
        .ok_or_else(|| AppError::InvalidRequest("completed trip has no driver".to_string()))?;

    let charge = state
        .gateway
        .charge(payment.amount_cents, "SDG", payment.id)
        .await;

    match charge {
        Ok(outcome) => {
            let mut tx = state.pool.begin().await?;

            wallet_service::credit_tx(
                &mut tx,
                driver_id,
                payment.driver_earnings_cents,
                TransactionType::TripEarning,
                Some("trip earnings"),
                None,
                None,
                TransactionRefs {
                    trip_id: Some(trip.id),
                    payment_id: Some(payment.id),
                    counterparty_user_id: Some(trip.passenger_id),
                },
            )
            .await?;

            let completed = sqlx::query_as::<_, Payment>(
                r#"
                UPDATE payments
                SET status = 'completed', processed_at = NOW(), completed_at = NOW(),
                    gateway_reference = $2, gateway_status = 'charged',
                    failure_reason = NULL, next_retry_at = NULL, updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(payment.id)
            .bind(&outcome.reference)
            .fetch_one(&mut *tx)
            .await?;

            enqueue_outcome(&mut tx, &completed, EVENT_PAYMENT_COMPLETED).await?;
            tx.commit().await?;
            Ok(completed)
        }
        Err(AppError::Gateway(reason)) => {
            let attempts = payment.retry_count + 1;
            let exhausted = attempts >= state.config.max_settlement_attempts;
            // 2^n minutes: 2, 4, 8 ... until the attempt cap.
            let next_retry = (!exhausted)
                .then(|| Utc::now() + ChronoDuration::minutes(1i64 << attempts.clamp(0, 10)));

            let failed = sqlx::query_as::<_, Payment>(
                r#"
                UPDATE payments
                SET status = 'failed', failed_at = NOW(), failure_reason = $2,
                    gateway_status = 'failed', retry_count = $3, next_retry_at = $4,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(payment.id)
            .bind(&reason)
            .bind(attempts)
            .bind(next_retry)
            .fetch_one(&state.pool)
            .await?;

            tracing::warn!(
                payment_id = %payment.id,
                attempts,
                exhausted,
                reason = %reason,
                "gateway settlement attempt failed"
            );

            if exhausted {
                let mut tx = state.pool.begin().await?;
                enqueue_outcome(&mut tx, &failed, EVENT_PAYMENT_FAILED).await?;
                tx.commit().await?;
            }
            Ok(failed)
        }
        Err(e) => Err(e),
    }
}

/// Refund a settled payment, fully or partially.
///
/// The passenger gets their money back through the ledger refund of the
/// original trip debit; the driver is symmetrically debited their share of
/// the refunded amount. Gateway payments refund through the gateway
/// instead of the passenger wallet.
pub async fn refund_payment(
    state: &AppState,
    payment_id: Uuid,
    actor: Uuid,
    actor_role: &str,
    request: RefundRequest,
) -> Result<Payment, AppError> {
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::PaymentNotFound)?;

    if payment.passenger_id != actor && actor_role != "admin" {
        return Err(AppError::NotAuthorized);
    }

    match payment.status() {
        PaymentStatus::Completed | PaymentStatus::PartiallyRefunded => {}
        _ => return Err(AppError::PaymentNotRefundable),
    }

    let remaining = payment.amount_cents - payment.refunded_amount_cents;
    let amount_cents = request.amount_cents.unwrap_or(remaining);
    if amount_cents <= 0 {
        return Err(AppError::InvalidRequest(
            "refund amount must be positive".to_string(),
        ));
    }
    if amount_cents > remaining {
        return Err(AppError::RefundExceedsOriginal);
    }

    // The driver's share of this refund, proportional to their cut.
    let driver_share_cents =
        proportional(payment.driver_earnings_cents, amount_cents, payment.amount_cents);

    match payment.method() {
        PaymentMethod::Wallet => {
            refund_wallet_payment(state, &payment, amount_cents, driver_share_cents, &request)
                .await
        }
        PaymentMethod::Ebs | PaymentMethod::Cyberpay => {
            let reference = payment.gateway_reference.clone().ok_or_else(|| {
                AppError::Gateway("payment has no gateway reference".to_string())
            })?;
            state.gateway.refund(&reference, amount_cents).await?;
            finish_refund(state, &payment, amount_cents, driver_share_cents, &request).await
        }
        // Cash moved outside the platform; only the record changes.
        PaymentMethod::Cash => {
            finish_refund(state, &payment, amount_cents, 0, &request).await
        }
    }
}

async fn refund_wallet_payment(
    state: &AppState,
    payment: &Payment,
    amount_cents: i64,
    driver_share_cents: i64,
    request: &RefundRequest,
) -> Result<Payment, AppError> {
    // The original passenger debit this refund reverses.
    let original = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE payment_id = $1 AND transaction_type = 'trip_payment'
        ORDER BY created_at
        LIMIT 1
        "#,
    )
    .bind(payment.id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| {
        tracing::error!(payment_id = %payment.id, "completed wallet payment has no debit row");
        AppError::PaymentNotRefundable
    })?;

    let mut tx = state.pool.begin().await?;

    wallet_service::refund_tx(
        &mut tx,
        original.id,
        amount_cents,
        Some(request.reason.as_str()),
        TransactionRefs {
            trip_id: Some(payment.trip_id),
            payment_id: Some(payment.id),
            counterparty_user_id: payment.driver_id,
        },
    )
    .await?;

    if driver_share_cents > 0 {
        let driver_id = payment.driver_id.ok_or_else(|| {
            AppError::InvalidRequest("payment has no driver to debit".to_string())
        })?;
        wallet_service::debit_tx(
            &mut tx,
            driver_id,
            driver_share_cents,
            TransactionType::Commission,
            Some("earnings reversal on refund"),
            TransactionRefs {
                trip_id: Some(payment.trip_id),
                payment_id: Some(payment.id),
                counterparty_user_id: Some(payment.passenger_id),
            },
        )
        .await?;
    }

    let updated = apply_refund_mark(&mut tx, payment, amount_cents, request).await?;
    enqueue_outcome(&mut tx, &updated, EVENT_PAYMENT_REFUNDED).await?;
    tx.commit().await?;
    Ok(updated)
}

async fn finish_refund(
    state: &AppState,
    payment: &Payment,
    amount_cents: i64,
    driver_share_cents: i64,
    request: &RefundRequest,
) -> Result<Payment, AppError> {
    let mut tx = state.pool.begin().await?;

    if driver_share_cents > 0 {
        let driver_id = payment.driver_id.ok_or_else(|| {
            AppError::InvalidRequest("payment has no driver to debit".to_string())
        })?;
        wallet_service::debit_tx(
            &mut tx,
            driver_id,
            driver_share_cents,
            TransactionType::Commission,
            Some("earnings reversal on refund"),
            TransactionRefs {
                trip_id: Some(payment.trip_id),
                payment_id: Some(payment.id),
                counterparty_user_id: Some(payment.passenger_id),
            },
        )
        .await?;
    }

    let updated = apply_refund_mark(&mut tx, payment, amount_cents, request).await?;
    enqueue_outcome(&mut tx, &updated, EVENT_PAYMENT_REFUNDED).await?;
    tx.commit().await?;
    Ok(updated)
}

async fn apply_refund_mark(
    tx: &mut sqlx::PgConnection,
    payment: &Payment,
    amount_cents: i64,
    request: &RefundRequest,
) -> Result<Payment, AppError> {
    let new_total = payment.refunded_amount_cents + amount_cents;
    let status = if new_total >= payment.amount_cents {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartiallyRefunded
    };

    // Conditional on the pre-read refunded amount: two racing refunds of
    // the same payment cannot both apply.
    let updated = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = $2, refunded_amount_cents = $3, refund_reason = $4,
            refunded_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND refunded_amount_cents = $5
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .bind(status.as_str())
    .bind(new_total)
    .bind(request.reason.as_str())
    .bind(payment.refunded_amount_cents)
    .fetch_optional(tx)
    .await?
    .ok_or(AppError::PaymentNotRefundable)?;

    Ok(updated)
}

async fn mark_failed(
    pool: &DbPool,
    payment_id: Uuid,
    reason: &str,
    next_retry_at: Option<chrono::DateTime<Utc>>,
) -> Result<Payment, AppError> {
    let mut tx = pool.begin().await?;

    let failed = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = 'failed', failed_at = NOW(), failure_reason = $2,
            next_retry_at = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(payment_id)
    .bind(reason)
    .bind(next_retry_at)
    .fetch_one(&mut *tx)
    .await?;

    enqueue_outcome(&mut tx, &failed, EVENT_PAYMENT_FAILED).await?;
    tx.commit().await?;
    Ok(failed)
}

async fn reload(pool: &DbPool, payment_id: Uuid) -> Result<Payment, AppError> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::PaymentNotFound)
}

/// Notify both parties about a settlement outcome, atomically with it.
async fn enqueue_outcome(
    tx: &mut sqlx::PgConnection,
    payment: &Payment,
    event_kind: &str,
) -> Result<(), AppError> {
    let payload = json!({
        "payment_id": payment.id,
        "trip_id": payment.trip_id,
        "status": payment.status,
        "method": payment.method,
        "amount_cents": payment.amount_cents,
        "driver_earnings_cents": payment.driver_earnings_cents,
        "refunded_amount_cents": payment.refunded_amount_cents,
        "failure_reason": payment.failure_reason,
    });

    outbox_service::enqueue(&mut *tx, payment.passenger_id, event_kind, payload.clone()).await?;
    if let Some(driver_id) = payment.driver_id {
        outbox_service::enqueue(&mut *tx, driver_id, event_kind, payload).await?;
    }
    Ok(())
}

/// Load the settlement outcome for a trip on behalf of a trip party.
pub async fn payment_for_trip(
    pool: &DbPool,
    trip_id: Uuid,
    actor: Uuid,
) -> Result<Payment, AppError> {
    let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
        .bind(trip_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::TripNotFound)?;
    if !trip.involves(actor) {
        return Err(AppError::NotAuthorized);
    }

    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE trip_id = $1")
        .bind(trip_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::PaymentNotFound)
}
