//! Trip state machine - owns the trip lifecycle.
//!
//! Transitions are enforced twice: against the in-memory table for a fast,
//! specific error, and again by a conditional `UPDATE ... WHERE status =
//! <expected>` so that concurrent writers resolve to exactly one winner.
//! The losers of the race get the same `InvalidTransition`/
//! `TripAlreadyAssigned` errors a stale client would.
//!
//! Settlement is a decoupled failure domain: the `completed` transition
//! commits on its own, and a settlement failure (or crash) leaves a
//! durably completed trip for the reconciliation sweep to pick up.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::fare;
use crate::geo;
use crate::models::outbox::{EVENT_TRIP_ASSIGNED, EVENT_TRIP_CANCELLED, EVENT_TRIP_STATUS};
use crate::models::trip::{
    CancellationReason, Trip, TripRequest, TripStatus, TripType, UpdateTripStatusRequest,
};
use crate::models::user::User;
use crate::services::{matching_service, outbox_service, settlement_service};
use crate::state::AppState;

async fn load_trip(pool: &DbPool, trip_id: Uuid) -> Result<Trip, AppError> {
    sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
        .bind(trip_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::TripNotFound)
}

/// Read a trip on behalf of an actor.
///
/// Only the trip's passenger or driver may see it.
pub async fn get_trip(pool: &DbPool, trip_id: Uuid, actor: Uuid) -> Result<Trip, AppError> {
    let trip = load_trip(pool, trip_id).await?;
    if !trip.involves(actor) {
        return Err(AppError::NotAuthorized);
    }
    Ok(trip)
}

/// Create a trip request.
///
/// Validates the passenger and the service area before any record exists,
/// quotes the fare, inserts the trip in `requested`, and spawns the offer
/// fan-out. The passenger's confirmation event commits atomically with
/// the trip row.
pub async fn request_trip(
    state: &AppState,
    passenger_id: Uuid,
    request: TripRequest,
) -> Result<Trip, AppError> {
    if !request.pickup.is_valid() || !request.dropoff.is_valid() {
        return Err(AppError::InvalidRequest(
            "pickup and dropoff must be valid coordinates".to_string(),
        ));
    }

    let area = &state.config.service_area;
    if !area.contains(request.pickup) || !area.contains(request.dropoff) {
        return Err(AppError::OutOfServiceArea);
    }

    let passenger = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(passenger_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::PassengerInactive)?;
    if !passenger.is_active_passenger() {
        return Err(AppError::PassengerInactive);
    }

    let distance_m = geo::haversine_m(request.pickup, request.dropoff);
    let duration_min = geo::eta_minutes(distance_m, state.config.average_speed_kmh);
    // Surge pricing areas are not wired up; quotes run un-surged.
    let surge_multiplier = 1.0;
    let breakdown = fare::quote(request.trip_type, distance_m, duration_min, surge_multiplier);

    let mut tx = state.pool.begin().await?;

    let trip = sqlx::query_as::<_, Trip>(
        r#"
        INSERT INTO trips (
            passenger_id, trip_type, payment_method,
            pickup_latitude, pickup_longitude, pickup_address,
            dropoff_latitude, dropoff_longitude, dropoff_address,
            estimated_fare_cents, estimated_distance_m, estimated_duration_min,
            fare_base_cents, fare_distance_cents, fare_time_cents,
            fare_surge_cents, surge_multiplier
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *
        "#,
    )
    .bind(passenger_id)
    .bind(request.trip_type.as_str())
    .bind(request.payment_method.as_str())
    .bind(request.pickup.latitude)
    .bind(request.pickup.longitude)
    .bind(&request.pickup_address)
    .bind(request.dropoff.latitude)
    .bind(request.dropoff.longitude)
    .bind(&request.dropoff_address)
    .bind(breakdown.total_cents)
    .bind(distance_m)
    .bind(duration_min)
    .bind(breakdown.base_cents)
    .bind(breakdown.distance_cents)
    .bind(breakdown.time_cents)
    .bind(breakdown.surge_cents)
    .bind(surge_multiplier)
    .fetch_one(&mut *tx)
    .await?;

    let (kind, payload) = matching_service::trip_requested_event(&trip);
    outbox_service::enqueue(&mut tx, passenger_id, kind, payload).await?;

    tx.commit().await?;

    tracing::info!(
        trip_id = %trip.id,
        passenger_id = %passenger_id,
        fare_cents = breakdown.total_cents,
        distance_m,
        "trip requested"
    );

    // Offers go out asynchronously; the request does not wait for them.
    tokio::spawn(matching_service::dispatch_offers(
        state.clone(),
        trip.clone(),
    ));

    Ok(trip)
}

/// Driver accepts a requested trip.
///
/// Exactly one driver wins: the availability flip and the status flip are
/// both conditional updates inside one transaction, so two concurrent
/// accepts serialize and the second sees zero affected rows.
pub async fn assign_driver(
    state: &AppState,
    trip_id: Uuid,
    driver_id: Uuid,
) -> Result<Trip, AppError> {
    // Fast validation against the store for a specific error; the
    // conditional update below remains the authority under races.
    let driver = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(driver_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::DriverNotAvailable)?;
    if !driver.is_assignable_driver() {
        return Err(AppError::DriverNotAvailable);
    }

    let mut tx = state.pool.begin().await?;

    // Claim the driver first; a driver already on a trip loses here.
    let driver_claimed = sqlx::query(
        r#"
        UPDATE users
        SET is_available = false, updated_at = NOW()
        WHERE id = $1
          AND role = 'driver'
          AND status = 'active'
          AND is_online = true
          AND is_available = true
        "#,
    )
    .bind(driver_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if driver_claimed == 0 {
        return Err(AppError::DriverNotAvailable);
    }

    // Claim the trip; only the first accept finds it still 'requested'.
    let trip = sqlx::query_as::<_, Trip>(
        r#"
        UPDATE trips
        SET status = 'driver_assigned',
            driver_id = $2,
            driver_assigned_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'requested'
        RETURNING *
        "#,
    )
    .bind(trip_id)
    .bind(driver_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(trip) = trip else {
        // Transaction drop rolls back the availability claim.
        return match load_trip(&state.pool, trip_id).await {
            Ok(_) => Err(AppError::TripAlreadyAssigned),
            Err(e) => Err(e),
        };
    };

    outbox_service::enqueue(
        &mut tx,
        trip.passenger_id,
        EVENT_TRIP_ASSIGNED,
        json!({
            "trip_id": trip.id,
            "driver_id": driver_id,
            "assigned_at": trip.driver_assigned_at,
        }),
    )
    .await?;

    tx.commit().await?;

    // The driver is busy now; stop matching them.
    state.cache.remove(driver_id);

    tracing::info!(trip_id = %trip.id, driver_id = %driver_id, "driver assigned");
    Ok(trip)
}

/// Advance a trip through its lifecycle on behalf of an actor.
///
/// Driver assignment has its own entry point (`assign_driver`); every
/// other transition flows through here. On `completed` the settlement
/// orchestrator runs after the transition has durably committed.
pub async fn update_status(
    state: &AppState,
    trip_id: Uuid,
    actor: Uuid,
    request: UpdateTripStatusRequest,
) -> Result<Trip, AppError> {
    let trip = load_trip(&state.pool, trip_id).await?;
    if !trip.involves(actor) {
        return Err(AppError::NotAuthorized);
    }

    let from = trip.status();
    let to = request.status;

    if to == TripStatus::Requested || to == TripStatus::DriverAssigned {
        return Err(AppError::InvalidRequest(
            "this status is set by the system, not by a status update".to_string(),
        ));
    }
    if !from.can_transition_to(to) {
        return Err(AppError::InvalidTransition { from, to });
    }

    let updated = match to {
        TripStatus::DriverArrived => mark_arrived(state, &trip, from).await?,
        TripStatus::InProgress => mark_started(state, &trip, from).await?,
        TripStatus::Completed => mark_completed(state, &trip, actor, &request).await?,
        TripStatus::Cancelled => mark_cancelled(state, &trip, from, actor, &request).await?,
        TripStatus::Requested | TripStatus::DriverAssigned => unreachable!("rejected above"),
    };

    tracing::info!(
        trip_id = %trip_id,
        from = %from,
        to = %to,
        actor = %actor,
        "trip status updated"
    );

    if to == TripStatus::Completed {
        // Decoupled failure domain: the trip is already durably completed.
        // A settlement error here is surfaced on the payment, never rolls
        // the trip back; a crash is covered by the reconciliation sweep.
        match settlement_service::settle_trip(state, trip_id).await {
            Ok(payment) => tracing::info!(
                trip_id = %trip_id,
                payment_id = %payment.id,
                status = %payment.status,
                "settlement finished"
            ),
            Err(e) => tracing::error!(trip_id = %trip_id, error = %e, "settlement failed"),
        }
        return load_trip(&state.pool, trip_id).await;
    }

    Ok(updated)
}

/// Conditional single-column milestone transitions share this shape.
async fn conditional_transition(
    state: &AppState,
    trip: &Trip,
    from: TripStatus,
    to: TripStatus,
    milestone_sql: &str,
) -> Result<Trip, AppError> {
    let sql = format!(
        "UPDATE trips SET status = $3, {milestone_sql} = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = $2 RETURNING *"
    );

    let mut tx = state.pool.begin().await?;

    let updated = sqlx::query_as::<_, Trip>(&sql)
        .bind(trip.id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&mut *tx)
        .await?;

    let Some(updated) = updated else {
        // Lost a race; report the transition against the fresh status.
        let current = load_trip(&state.pool, trip.id).await?;
        return Err(AppError::InvalidTransition {
            from: current.status(),
            to,
        });
    };

    let payload = json!({ "trip_id": updated.id, "status": updated.status });
    outbox_service::enqueue(&mut tx, updated.passenger_id, EVENT_TRIP_STATUS, payload.clone())
        .await?;
    if let Some(driver_id) = updated.driver_id {
        outbox_service::enqueue(&mut tx, driver_id, EVENT_TRIP_STATUS, payload).await?;
    }

    tx.commit().await?;
    Ok(updated)
}

async fn mark_arrived(state: &AppState, trip: &Trip, from: TripStatus) -> Result<Trip, AppError> {
    conditional_transition(state, trip, from, TripStatus::DriverArrived, "driver_arrived_at").await
}

async fn mark_started(state: &AppState, trip: &Trip, from: TripStatus) -> Result<Trip, AppError> {
    conditional_transition(state, trip, from, TripStatus::InProgress, "trip_started_at").await
}

async fn mark_completed(
    state: &AppState,
    trip: &Trip,
    actor: Uuid,
    request: &UpdateTripStatusRequest,
) -> Result<Trip, AppError> {
    if let Some(fare) = request.actual_fare_cents {
        if fare <= 0 {
            return Err(AppError::InvalidRequest(
                "actual fare must be positive".to_string(),
            ));
        }
    }

    // Final fare: explicit driver override wins, else re-quote from the
    // driven distance, else leave NULL and settle on the estimate.
    let now = Utc::now();
    let actual_duration_min = trip
        .trip_started_at
        .map(|started| ((now - started).num_seconds().max(0) + 30) / 60);
    let actual_fare_cents = request.actual_fare_cents.or_else(|| {
        request.actual_distance_m.map(|d| {
            let trip_type = TripType::parse(&trip.trip_type).unwrap_or(TripType::Standard);
            fare::quote(
                trip_type,
                d,
                actual_duration_min.unwrap_or(trip.estimated_duration_min),
                trip.surge_multiplier,
            )
            .total_cents
        })
    });

    let mut tx = state.pool.begin().await?;

    let updated = sqlx::query_as::<_, Trip>(
        r#"
        UPDATE trips
        SET status = 'completed',
            trip_completed_at = NOW(),
            actual_duration_min = $3,
            actual_distance_m = $4,
            actual_fare_cents = $5,
            updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(trip.id)
    .bind(TripStatus::InProgress.as_str())
    .bind(actual_duration_min)
    .bind(request.actual_distance_m)
    .bind(actual_fare_cents)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(updated) = updated else {
        let current = load_trip(&state.pool, trip.id).await?;
        return Err(AppError::InvalidTransition {
            from: current.status(),
            to: TripStatus::Completed,
        });
    };

    // Release the driver and bump both trip counters in the same unit.
    if let Some(driver_id) = updated.driver_id {
        sqlx::query(
            "UPDATE users SET is_available = true, total_trips = total_trips + 1, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(driver_id)
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query(
        "UPDATE users SET total_trips = total_trips + 1, updated_at = NOW() WHERE id = $1",
    )
    .bind(updated.passenger_id)
    .execute(&mut *tx)
    .await?;

    let payload = json!({
        "trip_id": updated.id,
        "status": updated.status,
        "actual_fare_cents": updated.actual_fare_cents,
        "actual_duration_min": updated.actual_duration_min,
        "completed_by": actor,
    });
    outbox_service::enqueue(&mut tx, updated.passenger_id, EVENT_TRIP_STATUS, payload.clone())
        .await?;
    if let Some(driver_id) = updated.driver_id {
        outbox_service::enqueue(&mut tx, driver_id, EVENT_TRIP_STATUS, payload).await?;
    }

    tx.commit().await?;
    Ok(updated)
}

async fn mark_cancelled(
    state: &AppState,
    trip: &Trip,
    from: TripStatus,
    actor: Uuid,
    request: &UpdateTripStatusRequest,
) -> Result<Trip, AppError> {
    let reason = request.cancellation_reason.unwrap_or({
        if Some(actor) == trip.driver_id {
            CancellationReason::DriverCancelled
        } else {
            CancellationReason::PassengerCancelled
        }
    });

    let mut tx = state.pool.begin().await?;

    let updated = sqlx::query_as::<_, Trip>(
        r#"
        UPDATE trips
        SET status = 'cancelled',
            cancellation_reason = $3,
            cancelled_by = $4,
            cancelled_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(trip.id)
    .bind(from.as_str())
    .bind(reason.as_str())
    .bind(actor)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(updated) = updated else {
        let current = load_trip(&state.pool, trip.id).await?;
        return Err(AppError::InvalidTransition {
            from: current.status(),
            to: TripStatus::Cancelled,
        });
    };

    // A cancelled trip frees its driver for new assignments.
    if let Some(driver_id) = updated.driver_id {
        sqlx::query("UPDATE users SET is_available = true, updated_at = NOW() WHERE id = $1")
            .bind(driver_id)
            .execute(&mut *tx)
            .await?;
    }

    let payload = json!({
        "trip_id": updated.id,
        "reason": reason.as_str(),
        "cancelled_by": actor,
    });
    outbox_service::enqueue(&mut tx, updated.passenger_id, EVENT_TRIP_CANCELLED, payload.clone())
        .await?;
    if let Some(driver_id) = updated.driver_id {
        outbox_service::enqueue(&mut tx, driver_id, EVENT_TRIP_CANCELLED, payload).await?;
    }

    tx.commit().await?;
    Ok(updated)
}
