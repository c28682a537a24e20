//! # Fine Calculator
//!
//! ```text
//! fine(due, now, rate) = max(0, ceil((now - due) / 1 day)) × rate
//!
//!   due        due+1d      due+2d      due+3d
//!    │───────────│───────────│───────────│
//!    0     1×rate      2×rate      3×rate
//!          ▲ any lateness inside a started day counts as the whole day
//! ```
//!
//! The calculator is the only place fines are computed. The return path and
//! the accrued-fine view both call it with the same `now`, so they agree.

use chrono::{DateTime, Duration, Utc};

use crate::money::Money;

/// Number of started days between `due` and `now`.
///
/// Zero while `now <= due`.
pub fn overdue_days(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = now.signed_duration_since(due);
    if elapsed <= Duration::zero() {
        return 0;
    }

    let whole = elapsed.num_days();
    let remainder = elapsed - Duration::days(whole);
    if remainder > Duration::zero() {
        whole + 1
    } else {
        whole
    }
}

/// Computes the fine owed for a book due at `due`, observed at `now`.
///
/// ## Example
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use libris_core::fine::fine;
/// use libris_core::money::Money;
///
/// let due = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
/// let rate = Money::from_cents(10);
///
/// assert_eq!(fine(due, due, rate), Money::zero());
/// assert_eq!(fine(due, due + Duration::days(1), rate).cents(), 10);
/// assert_eq!(fine(due, due + Duration::hours(36), rate).cents(), 20);
/// ```
pub fn fine(due: DateTime<Utc>, now: DateTime<Utc>, rate_per_day: Money) -> Money {
    if rate_per_day.is_negative() {
        return Money::zero();
    }
    rate_per_day.times_days(overdue_days(due, now))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()
    }

    const RATE: Money = Money::from_cents(10);

    #[test]
    fn test_no_fine_at_due_instant() {
        assert_eq!(fine(due(), due(), RATE), Money::zero());
    }

    #[test]
    fn test_no_fine_before_due() {
        assert_eq!(fine(due(), due() - Duration::days(3), RATE), Money::zero());
    }

    #[test]
    fn test_one_full_day() {
        assert_eq!(fine(due(), due() + Duration::days(1), RATE).cents(), 10);
    }

    #[test]
    fn test_partial_day_rounds_up() {
        assert_eq!(fine(due(), due() + Duration::hours(36), RATE).cents(), 20);
        assert_eq!(fine(due(), due() + Duration::seconds(1), RATE).cents(), 10);
        assert_eq!(fine(due(), due() + Duration::nanoseconds(1), RATE).cents(), 10);
    }

    #[test]
    fn test_fine_is_monotonic_after_due() {
        let mut previous = Money::zero();
        for hours in 0..24 * 10 {
            let current = fine(due(), due() + Duration::hours(hours), RATE);
            assert!(current >= previous, "fine decreased at +{}h", hours);
            previous = current;
        }
    }

    #[test]
    fn test_zero_rate_never_charges() {
        assert_eq!(
            fine(due(), due() + Duration::days(30), Money::zero()),
            Money::zero()
        );
    }

    #[test]
    fn test_overdue_days() {
        assert_eq!(overdue_days(due(), due()), 0);
        assert_eq!(overdue_days(due(), due() + Duration::days(2)), 2);
        assert_eq!(overdue_days(due(), due() + Duration::minutes(2881)), 3);
    }
}
