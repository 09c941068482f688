//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment
//! variables into a type-safe struct.

use serde::Deserialize;

use crate::geo::ServiceArea;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `COMMISSION_RATE_BPS` (optional): platform commission in basis points,
///   defaults to 1500 (15%)
/// - `NOTIFICATION_URL` (optional): endpoint the outbox dispatcher posts to
/// - `NOTIFICATION_SECRET` (optional): HMAC key for notification signatures
/// - `GATEWAY_URL` (optional): payment gateway endpoint (EBS/CyberPay facade)
///
/// The service-area bounds, matcher defaults, and retry policy all have
/// Khartoum-calibrated defaults and are rarely overridden outside tests.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    /// Platform commission taken from every settled fare, in basis points.
    #[serde(default = "default_commission_rate_bps")]
    pub commission_rate_bps: i64,

    /// Assumed average urban speed for ETA and duration estimates, km/h.
    #[serde(default = "default_average_speed_kmh")]
    pub average_speed_kmh: f64,

    /// Default radius for nearby-driver searches, meters.
    #[serde(default = "default_search_radius_m")]
    pub search_radius_m: i64,

    /// Maximum candidates returned by a nearby-driver search.
    #[serde(default = "default_search_limit")]
    pub search_limit: i64,

    /// TTL for cached driver positions, seconds. Disconnected drivers
    /// self-expire after this long without a ping.
    #[serde(default = "default_location_ttl_secs")]
    pub location_ttl_secs: u64,

    /// Minutes a trip may sit in `requested` before the sweep cancels it.
    #[serde(default = "default_request_timeout_mins")]
    pub request_timeout_mins: i64,

    /// Maximum gateway settlement attempts before the payment becomes
    /// terminally failed.
    #[serde(default = "default_max_settlement_attempts")]
    pub max_settlement_attempts: i32,

    /// Maximum delivery attempts for one outbox event.
    #[serde(default = "default_max_notify_attempts")]
    pub max_notify_attempts: i32,

    /// Rectangular service area; defaults to the Khartoum bounding box.
    #[serde(default)]
    pub service_area: ServiceArea,

    /// Where the outbox dispatcher delivers notifications. Unset disables
    /// delivery (events stay queued).
    #[serde(default)]
    pub notification_url: Option<String>,

    /// HMAC-SHA256 key for the `X-Notification-Signature` header.
    #[serde(default = "default_notification_secret")]
    pub notification_secret: String,

    /// Payment gateway base URL. Unset means gateway charges fail fast as
    /// transient errors (and are retried by the sweep).
    #[serde(default)]
    pub gateway_url: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_commission_rate_bps() -> i64 {
    1500
}

fn default_average_speed_kmh() -> f64 {
    30.0
}

fn default_search_radius_m() -> i64 {
    5_000
}

fn default_search_limit() -> i64 {
    10
}

fn default_location_ttl_secs() -> u64 {
    30
}

fn default_request_timeout_mins() -> i64 {
    30
}

fn default_max_settlement_attempts() -> i32 {
    3
}

fn default_max_notify_attempts() -> i32 {
    5
}

fn default_notification_secret() -> String {
    "dev-notification-secret".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` first if present, then deserializes the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing, a value cannot be
    /// parsed, or a configured URL is malformed.
    pub fn from_env() -> anyhow::Result<Self> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(u) = &self.notification_url {
            url::Url::parse(u).map_err(|_| anyhow::anyhow!("NOTIFICATION_URL is not a valid URL"))?;
        }
        if let Some(u) = &self.gateway_url {
            url::Url::parse(u).map_err(|_| anyhow::anyhow!("GATEWAY_URL is not a valid URL"))?;
        }
        if self.commission_rate_bps < 0 || self.commission_rate_bps > 10_000 {
            anyhow::bail!("COMMISSION_RATE_BPS must be between 0 and 10000");
        }
        if self.average_speed_kmh <= 0.0 {
            anyhow::bail!("AVERAGE_SPEED_KMH must be positive");
        }
        Ok(())
    }
}
