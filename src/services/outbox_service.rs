//! Notification outbox and background loops.
//!
//! State-changing operations append their notification intents with
//! [`enqueue`] inside the same database transaction as their own commit,
//! so an intent is never lost even if the process dies before the send.
//! The dispatcher loop drains pending events and delivers them to the
//! external notification collaborator; delivery failures back off
//! exponentially and never touch the state change that produced the event.
//!
//! The other two loops are sweeps: settlement reconciliation (lost
//! triggers, due gateway retries) and the request timeout that cancels
//! trips no driver ever accepted.

use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::outbox::{OUTBOX_DEAD, OUTBOX_PENDING, OUTBOX_SENT, OutboxEvent};
use crate::models::trip::CancellationReason;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Append a notification intent to the outbox.
///
/// Must be called on the same transaction as the state change it
/// announces; both commit or neither does.
pub async fn enqueue(
    conn: &mut PgConnection,
    user_id: Uuid,
    event_kind: &str,
    payload: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO outbox_events (user_id, event_kind, payload) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(event_kind)
        .bind(payload)
        .execute(conn)
        .await?;
    Ok(())
}

/// Delivery backoff in minutes: 1, 2, 4, 8, ... doubling per attempt.
pub fn backoff_minutes(attempts: i32) -> i64 {
    1i64 << attempts.clamp(0, 10)
}

/// HMAC-SHA256 signature over the payload body.
///
/// Receivers recompute it from the shared secret and compare in constant
/// time. Format: `sha256=<hex>`.
pub fn notification_signature(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Deliver one batch of due events. Returns how many were attempted.
///
/// Rows are claimed with `FOR UPDATE SKIP LOCKED` so concurrent dispatcher
/// instances never double-send.
pub async fn dispatch_batch(
    pool: &DbPool,
    client: &reqwest::Client,
    notification_url: &str,
    secret: &str,
    max_attempts: i32,
) -> Result<usize, AppError> {
    let mut tx = pool.begin().await?;

    let events = sqlx::query_as::<_, OutboxEvent>(
        r#"
        SELECT * FROM outbox_events
        WHERE status = 'pending' AND next_attempt_at <= NOW()
        ORDER BY created_at
        LIMIT 50
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let attempted = events.len();

    for event in events {
        match send_notification(client, notification_url, secret, &event).await {
            Ok(()) => {
                sqlx::query(
                    "UPDATE outbox_events SET status = $2, sent_at = NOW() WHERE id = $1",
                )
                .bind(event.id)
                .bind(OUTBOX_SENT)
                .execute(&mut *tx)
                .await?;
            }
            Err(e) => {
                let attempts = event.attempts + 1;
                let status = if attempts >= max_attempts {
                    OUTBOX_DEAD
                } else {
                    OUTBOX_PENDING
                };
                tracing::warn!(
                    event_id = %event.id,
                    kind = %event.event_kind,
                    attempts,
                    error = %e,
                    "notification delivery failed"
                );
                sqlx::query(
                    r#"
                    UPDATE outbox_events
                    SET attempts = $2,
                        status = $3,
                        last_error = $4,
                        next_attempt_at = NOW() + make_interval(mins => $5)
                    WHERE id = $1
                    "#,
                )
                .bind(event.id)
                .bind(attempts)
                .bind(status)
                .bind(e.to_string())
                .bind(backoff_minutes(attempts) as i32)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    tx.commit().await?;
    Ok(attempted)
}

async fn send_notification(
    client: &reqwest::Client,
    notification_url: &str,
    secret: &str,
    event: &OutboxEvent,
) -> Result<(), AppError> {
    let body = serde_json::json!({
        "event_id": event.id,
        "user_id": event.user_id,
        "kind": event.event_kind,
        "payload": event.payload,
        "created_at": event.created_at,
    })
    .to_string();

    let signature = notification_signature(secret, &body);

    let response = client
        .post(notification_url)
        .header("Content-Type", "application/json")
        .header("X-Notification-Signature", signature)
        .header("X-Notification-Event-Id", event.id.to_string())
        .body(body)
        .send()
        .await
        .map_err(|e| AppError::Gateway(format!("notification send failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Gateway(format!(
            "notification endpoint returned {}",
            response.status()
        )));
    }

    Ok(())
}

/// Dispatcher loop. Runs forever; errors are logged and retried on the
/// next tick.
pub async fn run_dispatcher(state: AppState) {
    let Some(notification_url) = state.config.notification_url.clone() else {
        tracing::info!("NOTIFICATION_URL not set, outbox dispatcher idle");
        return;
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .unwrap_or_default();

    let mut tick = tokio::time::interval(std::time::Duration::from_secs(2));
    loop {
        tick.tick().await;
        match dispatch_batch(
            &state.pool,
            &client,
            &notification_url,
            &state.config.notification_secret,
            state.config.max_notify_attempts,
        )
        .await
        {
            Ok(0) => {}
            Ok(n) => tracing::debug!(attempted = n, "outbox batch dispatched"),
            Err(e) => tracing::error!(error = %e, "outbox dispatch failed"),
        }
    }
}

/// Settlement sweep loop: re-trigger settlement for completed trips whose
/// trigger was lost and for failed gateway payments whose retry is due.
pub async fn run_settlement_sweep(state: AppState) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        tick.tick().await;
        if let Err(e) = settlement_sweep_once(&state).await {
            tracing::error!(error = %e, "settlement sweep failed");
        }
    }
}

async fn settlement_sweep_once(state: &AppState) -> Result<(), AppError> {
    // Completed trips that never got a payment row (crash between the
    // completion commit and the settlement trigger).
    let orphans = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT t.id FROM trips t
        LEFT JOIN payments p ON p.trip_id = t.id
        WHERE t.status = 'completed'
          AND p.id IS NULL
          AND t.trip_completed_at < NOW() - interval '1 minute'
        LIMIT 20
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    // Failed gateway settlements whose backoff has elapsed.
    let retries = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT trip_id FROM payments
        WHERE status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= NOW()
        LIMIT 20
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    for trip_id in orphans.into_iter().chain(retries) {
        match super::settlement_service::settle_trip(state, trip_id).await {
            Ok(payment) => tracing::info!(
                %trip_id,
                payment_id = %payment.id,
                status = %payment.status,
                "settlement sweep processed trip"
            ),
            Err(e) => tracing::warn!(%trip_id, error = %e, "settlement sweep attempt failed"),
        }
    }

    Ok(())
}

/// Request timeout loop: cancel trips stuck in `requested`.
pub async fn run_request_timeout_sweep(state: AppState) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        tick.tick().await;
        if let Err(e) = cancel_stale_requests(&state).await {
            tracing::error!(error = %e, "request timeout sweep failed");
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StaleTrip {
    id: Uuid,
    passenger_id: Uuid,
}

async fn cancel_stale_requests(state: &AppState) -> Result<(), AppError> {
    let cutoff = Utc::now() - ChronoDuration::minutes(state.config.request_timeout_mins);

    let mut tx = state.pool.begin().await?;

    // The conditional status filter keeps this safe against a concurrent
    // assignment: a trip that just got a driver is no longer 'requested'.
    let stale = sqlx::query_as::<_, StaleTrip>(
        r#"
        UPDATE trips
        SET status = 'cancelled',
            cancellation_reason = $1,
            cancelled_at = NOW(),
            updated_at = NOW()
        WHERE status = 'requested' AND created_at < $2
        RETURNING id, passenger_id
        "#,
    )
    .bind(CancellationReason::NoDriverAvailable.as_str())
    .bind(cutoff)
    .fetch_all(&mut *tx)
    .await?;

    for trip in &stale {
        enqueue(
            &mut *tx,
            trip.passenger_id,
            crate::models::outbox::EVENT_TRIP_CANCELLED,
            serde_json::json!({
                "trip_id": trip.id,
                "reason": CancellationReason::NoDriverAvailable.as_str(),
            }),
        )
        .await?;
    }

    tx.commit().await?;

    if !stale.is_empty() {
        tracing::info!(count = stale.len(), "stale trip requests cancelled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_minutes(0), 1);
        assert_eq!(backoff_minutes(1), 2);
        assert_eq!(backoff_minutes(2), 4);
        assert_eq!(backoff_minutes(3), 8);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_minutes(10), 1024);
        assert_eq!(backoff_minutes(100), 1024);
        assert_eq!(backoff_minutes(-1), 1);
    }

    #[test]
    fn signature_is_stable_and_keyed() {
        let sig = notification_signature("secret", r#"{"a":1}"#);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig, notification_signature("secret", r#"{"a":1}"#));
        assert_ne!(sig, notification_signature("other", r#"{"a":1}"#));
        assert_ne!(sig, notification_signature("secret", r#"{"a":2}"#));
    }
}
