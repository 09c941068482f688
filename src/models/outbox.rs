//! Notification outbox model.
//!
//! Rows are appended in the same database transaction as the state change
//! they announce; the dispatcher drains them afterwards. Losing the
//! dispatcher never loses an intent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const OUTBOX_PENDING: &str = "pending";
pub const OUTBOX_SENT: &str = "sent";
/// Delivery gave up after the attempt cap; kept for inspection.
pub const OUTBOX_DEAD: &str = "dead";

// Event kinds emitted by the core. The notification collaborator fans
// these out to SMS/push/websocket channels.
pub const EVENT_TRIP_REQUESTED: &str = "trip_requested";
pub const EVENT_TRIP_OFFER: &str = "trip_offer";
pub const EVENT_TRIP_ASSIGNED: &str = "trip_assigned";
pub const EVENT_TRIP_STATUS: &str = "trip_status_changed";
pub const EVENT_TRIP_CANCELLED: &str = "trip_cancelled";
pub const EVENT_PAYMENT_COMPLETED: &str = "payment_completed";
pub const EVENT_PAYMENT_FAILED: &str = "payment_failed";
pub const EVENT_PAYMENT_REFUNDED: &str = "payment_refunded";

/// An outbox row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
