//! Shared application state.
//!
//! All wiring is explicit: the four core components receive exactly the
//! store, cache, and gateway handles they need here, at construction
//! time. There is no ambient container.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::DbPool;
use crate::services::gateway::HttpGateway;
use crate::services::geo_index::{CacheLocator, DriverCache, FallbackLocator, StoreLocator};

/// Cached driver positions bound; far above one city's concurrent fleet.
const DRIVER_CACHE_CAPACITY: usize = 50_000;

/// Everything a handler or background loop needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    /// Cache-then-store driver index used by the matcher.
    pub locator: Arc<FallbackLocator<CacheLocator, StoreLocator>>,
    /// Direct handle to the position cache for ingestion and eviction.
    pub cache: Arc<DriverCache>,
    pub gateway: Arc<HttpGateway>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Self {
        let cache = Arc::new(DriverCache::new(
            DRIVER_CACHE_CAPACITY,
            Duration::from_secs(config.location_ttl_secs),
        ));
        let locator = Arc::new(FallbackLocator::new(
            CacheLocator::new(cache.clone()),
            StoreLocator::new(pool.clone()),
        ));
        let gateway = Arc::new(HttpGateway::new(config.gateway_url.clone()));

        Self {
            pool,
            config: Arc::new(config),
            locator,
            cache,
            gateway,
        }
    }
}
