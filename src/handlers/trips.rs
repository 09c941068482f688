//! Trip HTTP handlers.
//!
//! - POST /api/v1/trips - request a trip
//! - POST /api/v1/trips/{id}/accept - driver accepts a requested trip
//! - POST /api/v1/trips/{id}/status - advance the trip lifecycle
//! - GET  /api/v1/trips/{id} - trip details for its passenger or driver
//! - GET  /api/v1/trips/{id}/payment - settlement outcome for the trip

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::payment::PaymentResponse,
    models::trip::{TripRequest, TripResponse, UpdateTripStatusRequest},
    services::{settlement_service, trip_service},
    state::AppState,
};

/// Request a trip.
///
/// # Request Body
///
/// ```json
/// {
///   "pickup": {"latitude": 15.5007, "longitude": 32.5532},
///   "pickup_address": "Khartoum Airport",
///   "dropoff": {"latitude": 15.588, "longitude": 32.5355},
///   "dropoff_address": "Blue Nile Bridge",
///   "trip_type": "standard",
///   "payment_method": "wallet"
/// }
/// ```
///
/// # Response (201)
///
/// The trip in `requested` state with fare, distance, and duration
/// estimates. Driver offers fan out asynchronously.
pub async fn request_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TripRequest>,
) -> Result<(StatusCode, Json<TripResponse>), AppError> {
    let trip = trip_service::request_trip(&state, auth.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(trip.into())))
}

/// Driver accepts a trip.
///
/// Exactly one driver wins a `requested` trip; everyone else gets
/// `trip_already_assigned` and keeps their availability.
pub async fn accept_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<TripResponse>, AppError> {
    let trip = trip_service::assign_driver(&state, trip_id, auth.user_id).await?;
    Ok(Json(trip.into()))
}

/// Advance the trip lifecycle.
///
/// Valid targets from here are `driver_arrived`, `in_progress`,
/// `completed`, and `cancelled`; the transition table rejects everything
/// else with `invalid_transition`. Completion triggers settlement.
pub async fn update_trip_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(trip_id): Path<Uuid>,
    Json(request): Json<UpdateTripStatusRequest>,
) -> Result<Json<TripResponse>, AppError> {
    let trip = trip_service::update_status(&state, trip_id, auth.user_id, request).await?;
    Ok(Json(trip.into()))
}

/// Trip details, visible only to its passenger or driver.
pub async fn get_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<TripResponse>, AppError> {
    let trip = trip_service::get_trip(&state.pool, trip_id, auth.user_id).await?;
    Ok(Json(trip.into()))
}

/// Settlement outcome for a trip.
///
/// A trip that is `completed` with a `failed` payment is a legitimate,
/// queryable end state, which is exactly what this endpoint surfaces.
pub async fn get_trip_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = settlement_service::payment_for_trip(&state.pool, trip_id, auth.user_id).await?;
    Ok(Json(payment.into()))
}
