//! Geographic primitives: coordinates, haversine distance, ETA, and the
//! rectangular service-area check.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers, as used by the haversine formula.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS-84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Coordinates must be a plausible lat/lon pair before they reach any
    /// query or fare computation.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance between two points in kilometers.
///
/// Sphere-approximated haversine; the error at city scale is well below the
/// accuracy of the GPS samples feeding it.
pub fn haversine_km(a: Point, b: Point) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Same distance in whole meters.
pub fn haversine_m(a: Point, b: Point) -> i64 {
    (haversine_km(a, b) * 1000.0).round() as i64
}

/// Estimated travel time in whole minutes at a configured average speed.
pub fn eta_minutes(distance_m: i64, average_speed_kmh: f64) -> i64 {
    let distance_km = distance_m as f64 / 1000.0;
    (distance_km / average_speed_kmh * 60.0).round() as i64
}

/// Rectangular service area, loaded from configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ServiceArea {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl ServiceArea {
    pub fn contains(&self, p: Point) -> bool {
        p.latitude >= self.south
            && p.latitude <= self.north
            && p.longitude >= self.west
            && p.longitude <= self.east
    }
}

impl Default for ServiceArea {
    /// Khartoum metropolitan bounding box.
    fn default() -> Self {
        Self {
            south: 15.3,
            north: 15.7,
            west: 32.3,
            east: 32.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_is_zero_for_identical_points() {
        let p = Point::new(15.5007, 32.5532);
        assert_eq!(haversine_m(p, p), 0);
    }

    #[test]
    fn haversine_across_khartoum() {
        // Pickup/dropoff from the standard-fare scenario. One degree of
        // latitude is ~111.2 km, so 0.08 deg lat + 0.05 deg lon at this
        // latitude lands a little above 10 km.
        let d = haversine_km(Point::new(15.50, 32.55), Point::new(15.58, 32.60));
        assert!(d > 10.0 && d < 10.8, "unexpected distance {d}");
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = Point::new(15.5007, 32.5532);
        let b = Point::new(15.588, 32.5355);
        assert_eq!(haversine_m(a, b), haversine_m(b, a));
    }

    #[test]
    fn eta_at_thirty_kmh() {
        // 5 km at 30 km/h is 10 minutes.
        assert_eq!(eta_minutes(5_000, 30.0), 10);
        assert_eq!(eta_minutes(0, 30.0), 0);
    }

    #[test]
    fn service_area_contains_khartoum_not_port_sudan() {
        let area = ServiceArea::default();
        assert!(area.contains(Point::new(15.5007, 32.5532)));
        assert!(!area.contains(Point::new(19.6158, 37.2164)));
    }

    #[test]
    fn coordinate_validation() {
        assert!(Point::new(15.5, 32.5).is_valid());
        assert!(!Point::new(91.0, 32.5).is_valid());
        assert!(!Point::new(15.5, 181.0).is_valid());
        assert!(!Point::new(f64::NAN, 32.5).is_valid());
    }
}
