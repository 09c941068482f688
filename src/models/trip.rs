//! Trip data model and API request/response types.
//!
//! The trip is a finite-state machine:
//!
//! ```text
//! Requested -> DriverAssigned -> DriverArrived -> InProgress -> Completed
//!     \              |                 |              |
//!      +-------------+-----------------+--------------+-----> Cancelled
//! ```
//!
//! `Cancelled` is reachable from every non-terminal state; `Completed` only
//! from `InProgress`. Everything else is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Point;
use crate::models::payment::PaymentMethod;

/// Lifecycle states of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Requested,
    DriverAssigned,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::DriverAssigned => "driver_assigned",
            TripStatus::DriverArrived => "driver_arrived",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(TripStatus::Requested),
            "driver_assigned" => Some(TripStatus::DriverAssigned),
            "driver_arrived" => Some(TripStatus::DriverArrived),
            "in_progress" => Some(TripStatus::InProgress),
            "completed" => Some(TripStatus::Completed),
            "cancelled" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// The transition table. Exactly these pairs are allowed; every other
    /// adjacent pair is an invalid transition.
    pub fn can_transition_to(&self, to: TripStatus) -> bool {
        use TripStatus::*;
        match (self, to) {
            (Requested, DriverAssigned) => true,
            (DriverAssigned, DriverArrived) => true,
            (DriverArrived, InProgress) => true,
            (InProgress, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service classes with distinct fare tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    Standard,
    Premium,
    Shared,
    Delivery,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::Standard => "standard",
            TripType::Premium => "premium",
            TripType::Shared => "shared",
            TripType::Delivery => "delivery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(TripType::Standard),
            "premium" => Some(TripType::Premium),
            "shared" => Some(TripType::Shared),
            "delivery" => Some(TripType::Delivery),
            _ => None,
        }
    }
}

/// Who or what cancelled a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    PassengerCancelled,
    DriverCancelled,
    NoDriverAvailable,
    PaymentFailed,
    SystemCancelled,
}

impl CancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::PassengerCancelled => "passenger_cancelled",
            CancellationReason::DriverCancelled => "driver_cancelled",
            CancellationReason::NoDriverAvailable => "no_driver_available",
            CancellationReason::PaymentFailed => "payment_failed",
            CancellationReason::SystemCancelled => "system_cancelled",
        }
    }
}

/// A trip row.
///
/// Status is stored as text; use [`Trip::status`] for the typed view.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Trip {
    pub id: Uuid,
    pub status: String,
    pub trip_type: String,
    pub payment_method: String,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,

    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: String,
    pub dropoff_latitude: f64,
    pub dropoff_longitude: f64,
    pub dropoff_address: String,

    pub estimated_fare_cents: i64,
    pub actual_fare_cents: Option<i64>,
    pub estimated_distance_m: i64,
    pub actual_distance_m: Option<i64>,
    pub estimated_duration_min: i64,
    pub actual_duration_min: Option<i64>,

    pub fare_base_cents: i64,
    pub fare_distance_cents: i64,
    pub fare_time_cents: i64,
    pub fare_surge_cents: i64,
    pub surge_multiplier: f64,

    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,

    pub driver_assigned_at: Option<DateTime<Utc>>,
    pub driver_arrived_at: Option<DateTime<Utc>>,
    pub trip_started_at: Option<DateTime<Utc>>,
    pub trip_completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// Typed status. The CHECK constraint guarantees the column holds one
    /// of the known states.
    pub fn status(&self) -> TripStatus {
        TripStatus::parse(&self.status).unwrap_or(TripStatus::Cancelled)
    }

    pub fn pickup(&self) -> Point {
        Point::new(self.pickup_latitude, self.pickup_longitude)
    }

    pub fn dropoff(&self) -> Point {
        Point::new(self.dropoff_latitude, self.dropoff_longitude)
    }

    /// True when the actor is a party to the trip.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.passenger_id == user_id || self.driver_id == Some(user_id)
    }

    /// The fare settlement should move: actual when the driver closed the
    /// trip with a final figure, otherwise the estimate.
    pub fn settlement_fare_cents(&self) -> i64 {
        self.actual_fare_cents.unwrap_or(self.estimated_fare_cents)
    }

    /// Typed payment method chosen at request time.
    pub fn payment_method(&self) -> PaymentMethod {
        PaymentMethod::parse(&self.payment_method).unwrap_or(PaymentMethod::Cash)
    }
}

/// Request body for `POST /api/v1/trips`.
///
/// ```json
/// {
///   "pickup": {"latitude": 15.5007, "longitude": 32.5532},
///   "pickup_address": "Khartoum Airport",
///   "dropoff": {"latitude": 15.588, "longitude": 32.5355},
///   "dropoff_address": "Blue Nile Bridge",
///   "trip_type": "standard"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct TripRequest {
    pub pickup: Point,
    pub pickup_address: String,
    pub dropoff: Point,
    pub dropoff_address: String,
    #[serde(default = "default_trip_type")]
    pub trip_type: TripType,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
}

fn default_trip_type() -> TripType {
    TripType::Standard
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Wallet
}

/// Request body for `POST /api/v1/trips/{id}/status`.
///
/// The optional fields only apply to specific targets: a cancellation may
/// carry a reason; a completion may carry the driver's final distance or
/// fare override.
#[derive(Debug, Deserialize)]
pub struct UpdateTripStatusRequest {
    pub status: TripStatus,
    pub cancellation_reason: Option<CancellationReason>,
    pub actual_distance_m: Option<i64>,
    pub actual_fare_cents: Option<i64>,
}

/// Trip view returned to passengers and drivers.
#[derive(Debug, Serialize)]
pub struct TripResponse {
    pub id: Uuid,
    pub status: String,
    pub trip_type: String,
    pub payment_method: String,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Point,
    pub pickup_address: String,
    pub dropoff: Point,
    pub dropoff_address: String,
    pub estimated_fare_cents: i64,
    pub actual_fare_cents: Option<i64>,
    pub estimated_distance_m: i64,
    pub estimated_duration_min: i64,
    pub actual_duration_min: Option<i64>,
    pub fare_base_cents: i64,
    pub fare_distance_cents: i64,
    pub fare_time_cents: i64,
    pub fare_surge_cents: i64,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Trip> for TripResponse {
    fn from(trip: Trip) -> Self {
        Self {
            id: trip.id,
            status: trip.status.clone(),
            trip_type: trip.trip_type.clone(),
            payment_method: trip.payment_method.clone(),
            passenger_id: trip.passenger_id,
            driver_id: trip.driver_id,
            pickup: trip.pickup(),
            pickup_address: trip.pickup_address.clone(),
            dropoff: trip.dropoff(),
            dropoff_address: trip.dropoff_address.clone(),
            estimated_fare_cents: trip.estimated_fare_cents,
            actual_fare_cents: trip.actual_fare_cents,
            estimated_distance_m: trip.estimated_distance_m,
            estimated_duration_min: trip.estimated_duration_min,
            actual_duration_min: trip.actual_duration_min,
            fare_base_cents: trip.fare_base_cents,
            fare_distance_cents: trip.fare_distance_cents,
            fare_time_cents: trip.fare_time_cents,
            fare_surge_cents: trip.fare_surge_cents,
            cancellation_reason: trip.cancellation_reason,
            created_at: trip.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TripStatus; 6] = [
        TripStatus::Requested,
        TripStatus::DriverAssigned,
        TripStatus::DriverArrived,
        TripStatus::InProgress,
        TripStatus::Completed,
        TripStatus::Cancelled,
    ];

    #[test]
    fn the_happy_path_is_allowed() {
        assert!(TripStatus::Requested.can_transition_to(TripStatus::DriverAssigned));
        assert!(TripStatus::DriverAssigned.can_transition_to(TripStatus::DriverArrived));
        assert!(TripStatus::DriverArrived.can_transition_to(TripStatus::InProgress));
        assert!(TripStatus::InProgress.can_transition_to(TripStatus::Completed));
    }

    #[test]
    fn cancellation_is_allowed_from_every_non_terminal_state() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(TripStatus::Cancelled),
                !from.is_terminal(),
                "cancel from {from}"
            );
        }
    }

    #[test]
    fn exactly_the_table_pairs_are_allowed() {
        use TripStatus::*;
        let allowed = [
            (Requested, DriverAssigned),
            (DriverAssigned, DriverArrived),
            (DriverArrived, InProgress),
            (InProgress, Completed),
            (Requested, Cancelled),
            (DriverAssigned, Cancelled),
            (DriverArrived, Cancelled),
            (InProgress, Cancelled),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn completed_is_only_reachable_from_in_progress() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(TripStatus::Completed),
                from == TripStatus::InProgress
            );
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in ALL {
            assert_eq!(TripStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TripStatus::parse("searching"), None);
    }
}
