//! User data model.
//!
//! Passengers and drivers share one table; driver-specific columns stay
//! NULL for passengers. Registration, OTP, and profile management live in
//! a separate service, so this model is read-mostly here: trip validation,
//! matching, and the availability flip at assignment time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const ROLE_PASSENGER: &str = "passenger";
pub const ROLE_DRIVER: &str = "driver";
pub const STATUS_ACTIVE: &str = "active";

/// A user row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub name: Option<String>,
    pub role: String,
    pub status: String,
    pub rating: f64,
    pub total_trips: i32,
    pub is_online: bool,
    pub is_available: bool,
    pub vehicle_type: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_plate: Option<String>,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A passenger may request trips only while active.
    pub fn is_active_passenger(&self) -> bool {
        self.role == ROLE_PASSENGER && self.status == STATUS_ACTIVE
    }

    /// A driver may receive assignments only while active, online, and
    /// not already on a trip.
    pub fn is_assignable_driver(&self) -> bool {
        self.role == ROLE_DRIVER
            && self.status == STATUS_ACTIVE
            && self.is_online
            && self.is_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str, status: &str, online: bool, available: bool) -> User {
        User {
            id: Uuid::nil(),
            phone: "+249123456789".into(),
            name: None,
            role: role.into(),
            status: status.into(),
            rating: 4.5,
            total_trips: 0,
            is_online: online,
            is_available: available,
            vehicle_type: None,
            vehicle_model: None,
            vehicle_plate: None,
            current_latitude: None,
            current_longitude: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn passenger_must_be_active() {
        assert!(user("passenger", "active", false, false).is_active_passenger());
        assert!(!user("passenger", "suspended", false, false).is_active_passenger());
        assert!(!user("driver", "active", true, true).is_active_passenger());
    }

    #[test]
    fn driver_must_be_active_online_and_free() {
        assert!(user("driver", "active", true, true).is_assignable_driver());
        assert!(!user("driver", "active", true, false).is_assignable_driver());
        assert!(!user("driver", "active", false, true).is_assignable_driver());
        assert!(!user("driver", "inactive", true, true).is_assignable_driver());
    }
}
