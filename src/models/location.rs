//! Location ingestion and nearby-driver API types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Point;

/// Request body for `POST /api/v1/location`.
///
/// One GPS sample from a driver's (or passenger's) device.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdateRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub accuracy_m: Option<f64>,
    /// Set while the sender is on an active trip; the sample then also
    /// extends the trip's route history.
    pub trip_id: Option<Uuid>,
}

impl LocationUpdateRequest {
    pub fn point(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }
}

/// The durable driver-position projection row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DriverLocation {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Query string for `GET /api/v1/drivers/nearby`.
#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: Option<i64>,
    pub limit: Option<i64>,
}

/// A ranked match candidate.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub name: Option<String>,
    pub rating: f64,
    pub total_trips: i32,
    pub vehicle_type: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_plate: Option<String>,
    pub location: Point,
    pub distance_m: i64,
    pub eta_minutes: i64,
}

/// Request body for `POST /api/v1/drivers/availability`.
#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub is_online: bool,
    pub is_available: bool,
}
