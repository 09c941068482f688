//! Fare calculation.
//!
//! Pure function from (trip type, distance, duration, surge) to a fare
//! breakdown. Each component is rounded to cents exactly once; the total is
//! the sum of the rounded components and is never re-rounded.

use serde::Serialize;

use crate::models::trip::TripType;
use crate::money::cents_from_sdg;

/// Per-type pricing in cents: flag fall, per-kilometer, per-minute.
struct Rates {
    base_cents: i64,
    per_km_cents: i64,
    per_minute_cents: i64,
}

fn rates_for(trip_type: TripType) -> Rates {
    match trip_type {
        TripType::Standard => Rates {
            base_cents: 500,
            per_km_cents: 200,
            per_minute_cents: 0,
        },
        TripType::Premium => Rates {
            base_cents: 800,
            per_km_cents: 350,
            per_minute_cents: 50,
        },
        TripType::Shared => Rates {
            base_cents: 300,
            per_km_cents: 150,
            per_minute_cents: 0,
        },
        TripType::Delivery => Rates {
            base_cents: 400,
            per_km_cents: 200,
            per_minute_cents: 0,
        },
    }
}

/// Itemized fare. `total_cents` is always the exact sum of the components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FareBreakdown {
    pub base_cents: i64,
    pub distance_cents: i64,
    pub time_cents: i64,
    pub surge_cents: i64,
    pub total_cents: i64,
}

/// Quote a fare.
///
/// `surge_multiplier` of 1.0 means no surge; the surge component is the
/// extra charge over the un-surged subtotal, rounded once.
pub fn quote(
    trip_type: TripType,
    distance_m: i64,
    duration_min: i64,
    surge_multiplier: f64,
) -> FareBreakdown {
    let rates = rates_for(trip_type);
    let distance_km = distance_m as f64 / 1000.0;

    let base_cents = rates.base_cents;
    let distance_cents = cents_from_sdg(distance_km * rates.per_km_cents as f64 / 100.0);
    let time_cents = duration_min * rates.per_minute_cents;

    let subtotal = base_cents + distance_cents + time_cents;
    let surge_cents = cents_from_sdg(subtotal as f64 / 100.0 * (surge_multiplier - 1.0).max(0.0));

    FareBreakdown {
        base_cents,
        distance_cents,
        time_cents,
        surge_cents,
        total_cents: subtotal + surge_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_fare_is_base_plus_two_per_km() {
        // 9.36 km standard, no surge: 5.00 + 9.36 * 2.00 = 23.72 SDG.
        let fare = quote(TripType::Standard, 9_360, 19, 1.0);
        assert_eq!(fare.base_cents, 500);
        assert_eq!(fare.distance_cents, 1872);
        assert_eq!(fare.time_cents, 0);
        assert_eq!(fare.surge_cents, 0);
        assert_eq!(fare.total_cents, 2372);
    }

    #[test]
    fn premium_charges_time() {
        // 5 km, 12 min premium: 8.00 + 17.50 + 6.00 = 31.50 SDG.
        let fare = quote(TripType::Premium, 5_000, 12, 1.0);
        assert_eq!(fare.base_cents, 800);
        assert_eq!(fare.distance_cents, 1750);
        assert_eq!(fare.time_cents, 600);
        assert_eq!(fare.total_cents, 3150);
    }

    #[test]
    fn surge_applies_once_to_the_subtotal() {
        // 1.5x on a 23.72 subtotal adds 11.86.
        let fare = quote(TripType::Standard, 9_360, 19, 1.5);
        assert_eq!(fare.surge_cents, 1186);
        assert_eq!(fare.total_cents, 2372 + 1186);
    }

    #[test]
    fn surge_below_one_never_discounts() {
        let fare = quote(TripType::Standard, 9_360, 19, 0.5);
        assert_eq!(fare.surge_cents, 0);
        assert_eq!(fare.total_cents, 2372);
    }

    #[test]
    fn total_is_the_sum_of_components() {
        for (t, d, m, s) in [
            (TripType::Standard, 1_234, 5, 1.0),
            (TripType::Premium, 18_777, 41, 2.0),
            (TripType::Shared, 333, 2, 1.3),
            (TripType::Delivery, 9_999, 15, 1.0),
        ] {
            let f = quote(t, d, m, s);
            assert_eq!(
                f.total_cents,
                f.base_cents + f.distance_cents + f.time_cents + f.surge_cents
            );
        }
    }

    #[test]
    fn zero_distance_still_charges_the_base() {
        let fare = quote(TripType::Shared, 0, 0, 1.0);
        assert_eq!(fare.total_cents, 300);
    }
}
