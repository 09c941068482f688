//! Driver matcher: turn a pickup point into a ranked offer list.
//!
//! The locator answers "who is physically close"; this module joins the
//! driver profiles, drops anyone the store no longer considers
//! assignable, and ranks the rest by rating descending, then distance
//! ascending. ETA comes from one configured average speed.

use serde_json::json;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::geo::{Point, eta_minutes};
use crate::models::location::NearbyDriver;
use crate::models::outbox::{EVENT_TRIP_OFFER, EVENT_TRIP_REQUESTED};
use crate::models::trip::Trip;
use crate::models::user::User;
use crate::services::geo_index::{DriverHit, DriverLocator};
use crate::services::outbox_service;
use crate::state::AppState;

/// Rank hits in place: best-rated first, nearest breaking ties.
pub fn rank_candidates(candidates: &mut [NearbyDriver]) {
    candidates.sort_by(|a, b| {
        b.rating
            .partial_cmp(&a.rating)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.distance_m.cmp(&b.distance_m))
    });
}

/// Find assignable drivers near a point, ranked for offering.
pub async fn find_candidates<L: DriverLocator>(
    pool: &DbPool,
    locator: &L,
    center: Point,
    radius_m: i64,
    limit: i64,
    average_speed_kmh: f64,
) -> Result<Vec<NearbyDriver>, AppError> {
    let hits = locator.find_nearby(center, radius_m, limit).await?;
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = hits.iter().map(|h| h.driver_id).collect();

    // Profiles come from the store; a cached position whose driver just
    // went busy is filtered out here, never offered.
    let profiles = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE id = ANY($1)
          AND role = 'driver'
          AND status = 'active'
          AND is_online = true
          AND is_available = true
        "#,
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<NearbyDriver> = profiles
        .into_iter()
        .filter_map(|driver| {
            let hit = hits.iter().find(|h| h.driver_id == driver.id)?;
            Some(candidate_from(hit, &driver, average_speed_kmh))
        })
        .collect();

    rank_candidates(&mut candidates);
    Ok(candidates)
}

fn candidate_from(hit: &DriverHit, driver: &User, average_speed_kmh: f64) -> NearbyDriver {
    NearbyDriver {
        driver_id: driver.id,
        name: driver.name.clone(),
        rating: driver.rating,
        total_trips: driver.total_trips,
        vehicle_type: driver.vehicle_type.clone(),
        vehicle_model: driver.vehicle_model.clone(),
        vehicle_plate: driver.vehicle_plate.clone(),
        location: hit.location,
        distance_m: hit.distance_m,
        eta_minutes: eta_minutes(hit.distance_m, average_speed_kmh),
    }
}

/// Fan out offers for a freshly requested trip.
///
/// Runs detached from the request handler; the trip is already durably
/// `requested`, so a failure here only delays offers until a driver polls
/// or the request times out.
pub async fn dispatch_offers(state: AppState, trip: Trip) {
    let pickup = trip.pickup();
    let result = find_candidates(
        &state.pool,
        state.locator.as_ref(),
        pickup,
        state.config.search_radius_m,
        state.config.search_limit,
        state.config.average_speed_kmh,
    )
    .await;

    let candidates = match result {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(trip_id = %trip.id, error = %e, "offer fan-out search failed");
            return;
        }
    };

    if candidates.is_empty() {
        tracing::info!(trip_id = %trip.id, "no drivers available for trip request");
        return;
    }

    if let Err(e) = enqueue_offers(&state, &trip, &candidates).await {
        tracing::error!(trip_id = %trip.id, error = %e, "offer fan-out enqueue failed");
    }
}

async fn enqueue_offers(
    state: &AppState,
    trip: &Trip,
    candidates: &[NearbyDriver],
) -> Result<(), AppError> {
    let mut tx = state.pool.begin().await?;

    for candidate in candidates {
        outbox_service::enqueue(
            &mut tx,
            candidate.driver_id,
            EVENT_TRIP_OFFER,
            json!({
                "trip_id": trip.id,
                "pickup": trip.pickup(),
                "pickup_address": trip.pickup_address,
                "trip_type": trip.trip_type,
                "estimated_fare_cents": trip.estimated_fare_cents,
                "distance_m": candidate.distance_m,
                "eta_minutes": candidate.eta_minutes,
            }),
        )
        .await?;
    }

    tx.commit().await?;
    tracing::info!(
        trip_id = %trip.id,
        offers = candidates.len(),
        "trip offers dispatched"
    );
    Ok(())
}

/// Payload for the passenger's own request confirmation, enqueued in the
/// same transaction that creates the trip.
pub fn trip_requested_event(trip: &Trip) -> (&'static str, serde_json::Value) {
    (
        EVENT_TRIP_REQUESTED,
        json!({
            "trip_id": trip.id,
            "status": trip.status,
            "estimated_fare_cents": trip.estimated_fare_cents,
            "estimated_distance_m": trip.estimated_distance_m,
            "estimated_duration_min": trip.estimated_duration_min,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(rating: f64, distance_m: i64) -> NearbyDriver {
        NearbyDriver {
            driver_id: Uuid::new_v4(),
            name: None,
            rating,
            total_trips: 10,
            vehicle_type: None,
            vehicle_model: None,
            vehicle_plate: None,
            location: Point::new(15.55, 32.53),
            distance_m,
            eta_minutes: 5,
        }
    }

    #[test]
    fn higher_rating_wins_regardless_of_distance() {
        let mut c = vec![candidate(4.2, 100), candidate(4.9, 3_000)];
        rank_candidates(&mut c);
        assert_eq!(c[0].rating, 4.9);
    }

    #[test]
    fn distance_breaks_rating_ties() {
        let mut c = vec![candidate(4.5, 3_000), candidate(4.5, 100), candidate(4.5, 900)];
        rank_candidates(&mut c);
        let distances: Vec<i64> = c.iter().map(|x| x.distance_m).collect();
        assert_eq!(distances, vec![100, 900, 3_000]);
    }

    #[test]
    fn ranking_is_stable_for_a_full_ordering() {
        let mut c = vec![
            candidate(4.0, 500),
            candidate(5.0, 2_000),
            candidate(5.0, 100),
            candidate(3.0, 50),
        ];
        rank_candidates(&mut c);
        let key: Vec<(i64, i64)> = c
            .iter()
            .map(|x| ((x.rating * 10.0) as i64, x.distance_m))
            .collect();
        assert_eq!(key, vec![(50, 100), (50, 2_000), (40, 500), (30, 50)]);
    }
}
