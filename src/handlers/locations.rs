//! Location and driver-availability HTTP handlers.
//!
//! - POST /api/v1/location - GPS ping from a device
//! - GET  /api/v1/drivers/nearby - ranked nearby drivers
//! - POST /api/v1/drivers/availability - driver goes on/off shift

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde_json::json;

use crate::{
    error::AppError,
    geo::Point,
    middleware::auth::AuthContext,
    models::location::{AvailabilityRequest, LocationUpdateRequest, NearbyDriver, NearbyQuery},
    models::user::ROLE_DRIVER,
    services::matching_service,
    state::AppState,
};

/// Ingest one GPS sample.
///
/// Durable writes first (projection upsert + audit append), then the
/// in-process cache for available drivers. The cache write is best-effort
/// by design; the store remains the source of truth.
pub async fn update_location(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<LocationUpdateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let point = request.point();
    if !point.is_valid() {
        return Err(AppError::InvalidRequest(
            "latitude/longitude out of range".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO location_history (user_id, trip_id, latitude, longitude,
                                      heading, speed_kmh, accuracy_m)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(auth.user_id)
    .bind(request.trip_id)
    .bind(point.latitude)
    .bind(point.longitude)
    .bind(request.heading)
    .bind(request.speed_kmh)
    .bind(request.accuracy_m)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE users SET current_latitude = $2, current_longitude = $3, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(auth.user_id)
    .bind(point.latitude)
    .bind(point.longitude)
    .execute(&mut *tx)
    .await?;

    let mut cacheable = false;
    if auth.role == ROLE_DRIVER {
        sqlx::query(
            r#"
            INSERT INTO driver_locations (driver_id, latitude, longitude,
                                          heading, speed_kmh, accuracy_m, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (driver_id) DO UPDATE
            SET latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                heading = EXCLUDED.heading,
                speed_kmh = EXCLUDED.speed_kmh,
                accuracy_m = EXCLUDED.accuracy_m,
                recorded_at = NOW()
            "#,
        )
        .bind(auth.user_id)
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(request.heading)
        .bind(request.speed_kmh)
        .bind(request.accuracy_m)
        .execute(&mut *tx)
        .await?;

        // Only matchable drivers belong in the cache.
        cacheable = sqlx::query_scalar::<_, bool>(
            "SELECT is_online AND is_available AND status = 'active' \
             FROM users WHERE id = $1",
        )
        .bind(auth.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(false);
    }

    tx.commit().await?;

    if cacheable {
        state.cache.insert(auth.user_id, point);
    }

    Ok(Json(json!({
        "latitude": point.latitude,
        "longitude": point.longitude,
        "recorded": true
    })))
}

/// Ranked nearby drivers around a point.
pub async fn nearby_drivers(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthContext>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyDriver>>, AppError> {
    let center = Point::new(query.latitude, query.longitude);
    if !center.is_valid() {
        return Err(AppError::InvalidRequest(
            "latitude/longitude out of range".to_string(),
        ));
    }

    let radius_m = query.radius_m.unwrap_or(state.config.search_radius_m);
    let limit = query.limit.unwrap_or(state.config.search_limit);

    let candidates = matching_service::find_candidates(
        &state.pool,
        state.locator.as_ref(),
        center,
        radius_m.clamp(100, 50_000),
        limit.clamp(1, 50),
        state.config.average_speed_kmh,
    )
    .await?;

    Ok(Json(candidates))
}

/// Driver availability toggle.
///
/// Going offline (or busy) also drops the cached position so the driver
/// stops matching immediately instead of after the TTL.
pub async fn set_availability(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if auth.role != ROLE_DRIVER {
        return Err(AppError::NotAuthorized);
    }

    let updated = sqlx::query(
        "UPDATE users SET is_online = $2, is_available = $3, updated_at = NOW() \
         WHERE id = $1 AND role = 'driver'",
    )
    .bind(auth.user_id)
    .bind(request.is_online)
    .bind(request.is_available)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::NotAuthorized);
    }

    if !(request.is_online && request.is_available) {
        state.cache.remove(auth.user_id);
    }

    Ok(Json(json!({
        "is_online": request.is_online,
        "is_available": request.is_available
    })))
}
