//! Geo index: who is near this point right now.
//!
//! Two [`DriverLocator`] implementations composed by a fallback wrapper:
//!
//! - [`CacheLocator`]: in-process TTL cache of driver pings, lru-bounded.
//!   Sub-millisecond, best-effort, eventually consistent.
//! - [`StoreLocator`]: durable query over `driver_locations` joined with
//!   the availability flags on `users`; the source of truth.
//! - [`FallbackLocator`]: cache first; an empty cache result falls through
//!   to the store and the hits are written back to self-heal the cache.
//!
//! The index is never the authority for assignment. A stale entry can cost
//! a wasted offer, never a double booking; `assign_driver` re-validates
//! availability against the store.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::geo::{self, Point};
use crate::models::location::DriverLocation;

/// One position hit returned by a locator, distance already computed.
#[derive(Debug, Clone)]
pub struct DriverHit {
    pub driver_id: Uuid,
    pub location: Point,
    pub distance_m: i64,
}

/// Capability: answer radius queries over current driver positions.
pub trait DriverLocator {
    fn find_nearby(
        &self,
        center: Point,
        radius_m: i64,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<DriverHit>, AppError>> + Send;

    /// Offer fresh hits for caching. Default: not a cache, ignore them.
    fn refresh(&self, _hits: &[DriverHit]) {}
}

struct CachedPing {
    location: Point,
    inserted_at: Instant,
}

/// Shared in-process store of the latest ping per driver.
///
/// Entries expire after the TTL, so drivers that disconnect simply vanish
/// without an explicit deregistration step. Writes are independent per
/// driver key; the lock is held only for map operations.
pub struct DriverCache {
    entries: Mutex<LruCache<Uuid, CachedPing>>,
    ttl: Duration,
}

impl DriverCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one"),
            )),
            ttl,
        }
    }

    /// Record the latest position for a driver.
    pub fn insert(&self, driver_id: Uuid, location: Point) {
        let Ok(mut entries) = self.entries.lock() else {
            return; // Poisoned lock: skip the write, the store still has it
        };
        entries.put(
            driver_id,
            CachedPing {
                location,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop a driver eagerly (went offline, got assigned).
    pub fn remove(&self, driver_id: Uuid) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(&driver_id);
        }
    }

    /// All unexpired positions within the radius, nearest first.
    pub fn query(&self, center: Point, radius_m: i64, limit: usize) -> Vec<DriverHit> {
        let Ok(mut entries) = self.entries.lock() else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut expired = Vec::new();
        let mut hits = Vec::new();

        for (driver_id, ping) in entries.iter() {
            if now.duration_since(ping.inserted_at) > self.ttl {
                expired.push(*driver_id);
                continue;
            }
            let distance_m = geo::haversine_m(center, ping.location);
            if distance_m <= radius_m {
                hits.push(DriverHit {
                    driver_id: *driver_id,
                    location: ping.location,
                    distance_m,
                });
            }
        }

        for driver_id in expired {
            entries.pop(&driver_id);
        }

        hits.sort_by_key(|h| h.distance_m);
        hits.truncate(limit);
        hits
    }
}

/// Cache-backed locator.
pub struct CacheLocator {
    cache: Arc<DriverCache>,
}

impl CacheLocator {
    pub fn new(cache: Arc<DriverCache>) -> Self {
        Self { cache }
    }
}

impl DriverLocator for CacheLocator {
    async fn find_nearby(
        &self,
        center: Point,
        radius_m: i64,
        limit: i64,
    ) -> Result<Vec<DriverHit>, AppError> {
        Ok(self.cache.query(center, radius_m, limit.max(0) as usize))
    }

    fn refresh(&self, hits: &[DriverHit]) {
        for hit in hits {
            self.cache.insert(hit.driver_id, hit.location);
        }
    }
}

/// Store-backed locator: bounding-box prune in SQL, haversine refinement
/// here. Only online, available, active drivers qualify.
pub struct StoreLocator {
    pool: DbPool,
}

impl StoreLocator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DriverLocator for StoreLocator {
    async fn find_nearby(
        &self,
        center: Point,
        radius_m: i64,
        limit: i64,
    ) -> Result<Vec<DriverHit>, AppError> {
        // Degrees of latitude per meter are constant; longitude shrinks
        // with the cosine of the latitude.
        let lat_delta = radius_m as f64 / 111_320.0;
        let lon_delta = radius_m as f64 / (111_320.0 * center.latitude.to_radians().cos().max(0.01));

        let rows = sqlx::query_as::<_, DriverLocation>(
            r#"
            SELECT dl.*
            FROM driver_locations dl
            JOIN users u ON u.id = dl.driver_id
            WHERE u.role = 'driver'
              AND u.status = 'active'
              AND u.is_online = true
              AND u.is_available = true
              AND dl.latitude BETWEEN $1 AND $2
              AND dl.longitude BETWEEN $3 AND $4
            "#,
        )
        .bind(center.latitude - lat_delta)
        .bind(center.latitude + lat_delta)
        .bind(center.longitude - lon_delta)
        .bind(center.longitude + lon_delta)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<DriverHit> = rows
            .into_iter()
            .filter_map(|row| {
                let location = Point::new(row.latitude, row.longitude);
                let distance_m = geo::haversine_m(center, location);
                (distance_m <= radius_m).then_some(DriverHit {
                    driver_id: row.driver_id,
                    location,
                    distance_m,
                })
            })
            .collect();

        hits.sort_by_key(|h| h.distance_m);
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}

/// Cache-then-store composition.
pub struct FallbackLocator<P, S> {
    primary: P,
    fallback: S,
}

impl<P, S> FallbackLocator<P, S> {
    pub fn new(primary: P, fallback: S) -> Self {
        Self { primary, fallback }
    }
}

impl<P: DriverLocator + Sync, S: DriverLocator + Sync> DriverLocator for FallbackLocator<P, S> {
    async fn find_nearby(
        &self,
        center: Point,
        radius_m: i64,
        limit: i64,
    ) -> Result<Vec<DriverHit>, AppError> {
        let cached = self.primary.find_nearby(center, radius_m, limit).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }

        // Cold or outaged cache: hit the durable store, then self-heal.
        let stored = self.fallback.find_nearby(center, radius_m, limit).await?;
        self.primary.refresh(&stored);
        Ok(stored)
    }

    fn refresh(&self, hits: &[DriverHit]) {
        self.primary.refresh(hits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_ms: u64) -> DriverCache {
        DriverCache::new(100, Duration::from_millis(ttl_ms))
    }

    fn khartoum(offset_lat: f64) -> Point {
        Point::new(15.55 + offset_lat, 32.53)
    }

    #[test]
    fn query_returns_drivers_within_radius_nearest_first() {
        let c = cache(10_000);
        let near = Uuid::new_v4();
        let nearer = Uuid::new_v4();
        let far = Uuid::new_v4();
        c.insert(near, khartoum(0.010)); // ~1.1 km
        c.insert(nearer, khartoum(0.001)); // ~110 m
        c.insert(far, khartoum(0.100)); // ~11 km

        let hits = c.query(khartoum(0.0), 5_000, 10);
        let ids: Vec<Uuid> = hits.iter().map(|h| h.driver_id).collect();
        assert_eq!(ids, vec![nearer, near]);
        assert!(hits[0].distance_m < hits[1].distance_m);
    }

    #[test]
    fn query_honors_the_limit() {
        let c = cache(10_000);
        for i in 0..5 {
            c.insert(Uuid::new_v4(), khartoum(0.001 * i as f64));
        }
        assert_eq!(c.query(khartoum(0.0), 50_000, 3).len(), 3);
    }

    #[test]
    fn expired_pings_are_invisible_and_evicted() {
        let c = cache(10);
        let driver = Uuid::new_v4();
        c.insert(driver, khartoum(0.001));
        std::thread::sleep(Duration::from_millis(30));
        assert!(c.query(khartoum(0.0), 5_000, 10).is_empty());
        // A fresh ping brings the driver back.
        c.insert(driver, khartoum(0.001));
        assert_eq!(c.query(khartoum(0.0), 5_000, 10).len(), 1);
    }

    #[test]
    fn newer_ping_replaces_the_old_position() {
        let c = cache(10_000);
        let driver = Uuid::new_v4();
        c.insert(driver, khartoum(0.100));
        c.insert(driver, khartoum(0.001));
        let hits = c.query(khartoum(0.0), 5_000, 10);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].distance_m < 1_000);
    }

    #[test]
    fn removed_drivers_stop_matching() {
        let c = cache(10_000);
        let driver = Uuid::new_v4();
        c.insert(driver, khartoum(0.001));
        c.remove(driver);
        assert!(c.query(khartoum(0.0), 5_000, 10).is_empty());
    }

    #[tokio::test]
    async fn cache_locator_refresh_writes_back() {
        let shared = Arc::new(cache(10_000));
        let locator = CacheLocator::new(shared.clone());
        let driver = Uuid::new_v4();
        locator.refresh(&[DriverHit {
            driver_id: driver,
            location: khartoum(0.001),
            distance_m: 110,
        }]);

        let hits = locator.find_nearby(khartoum(0.0), 5_000, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].driver_id, driver);
    }
}
