//! Fixed-point money arithmetic.
//!
//! All amounts in the system are stored as `i64` cents (two fixed fractional
//! digits, SDG). Derived values (commission splits, proportional refunds)
//! round half-up exactly once at the point of computation and are never
//! re-rounded downstream.

/// Basis points in a whole (100%).
pub const BPS_SCALE: i64 = 10_000;

/// Convert a fractional SDG amount to cents, rounding half-up.
///
/// Used at the single point where a floating computation (distance × rate)
/// becomes money. Negative inputs round away from zero symmetrically.
pub fn cents_from_sdg(amount: f64) -> i64 {
    let scaled = amount * 100.0;
    if scaled >= 0.0 {
        (scaled + 0.5).floor() as i64
    } else {
        (scaled - 0.5).ceil() as i64
    }
}

/// Take a basis-point share of an amount in cents, rounding half-up.
///
/// `percentage(2372, 1500)` is the 15% platform commission on 23.72 SDG:
/// 355.8 cents rounds to 356.
pub fn percentage(amount_cents: i64, rate_bps: i64) -> i64 {
    let numerator = amount_cents * rate_bps;
    // Half-up on integer division: add half the divisor before dividing.
    (numerator + BPS_SCALE / 2).div_euclid(BPS_SCALE)
}

/// Proportional share `amount * part / whole` in cents, rounding half-up.
///
/// Used for partial refunds: the driver-side debit is the refunded
/// fraction of the original driver earnings.
pub fn proportional(amount_cents: i64, part: i64, whole: i64) -> i64 {
    debug_assert!(whole > 0, "proportional share of a zero whole");
    (amount_cents * part + whole / 2).div_euclid(whole)
}

/// Format cents as a decimal string for logs and notification payloads.
pub fn format_sdg(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.abs();
    format!("{}{}.{:02} SDG", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdg_conversion_rounds_half_up() {
        assert_eq!(cents_from_sdg(23.72), 2372);
        assert_eq!(cents_from_sdg(18.715), 1872); // exactly half a cent
        assert_eq!(cents_from_sdg(18.7149), 1871);
        assert_eq!(cents_from_sdg(0.0), 0);
    }

    #[test]
    fn percentage_rounds_half_up() {
        // 15% of 23.72 = 3.558 -> 3.56
        assert_eq!(percentage(2372, 1500), 356);
        // 15% of 25.00 = 3.75 exactly
        assert_eq!(percentage(2500, 1500), 375);
        // 15% of 0.10 = 0.015 -> 0.02 (half rounds up)
        assert_eq!(percentage(10, 1500), 2);
    }

    #[test]
    fn commission_split_always_reconstructs_the_fare() {
        for fare in [1, 10, 99, 100, 2372, 2500, 999_999] {
            let commission = percentage(fare, 1500);
            let earnings = fare - commission;
            assert_eq!(commission + earnings, fare);
            assert!(commission >= 0 && earnings >= 0);
        }
    }

    #[test]
    fn proportional_split_is_bounded_by_the_whole() {
        // Refunding 10.00 of a 25.00 payment with 21.25 driver earnings.
        let share = proportional(2125, 1000, 2500);
        assert_eq!(share, 850);
        // Full refund returns the full share.
        assert_eq!(proportional(2125, 2500, 2500), 2125);
    }

    #[test]
    fn formatting() {
        assert_eq!(format_sdg(2372), "23.72 SDG");
        assert_eq!(format_sdg(5), "0.05 SDG");
        assert_eq!(format_sdg(-150), "-1.50 SDG");
    }
}
