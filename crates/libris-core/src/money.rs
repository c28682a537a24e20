//! # Money Module
//!
//! Provides the `Money` type used for fine rates and fine amounts.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Fines are stored and compared, never just displayed:                   │
//! │                                                                         │
//! │    rate 0.10/day × 3 days = 0.30000000000000004  ❌ with floats         │
//! │    10 cents/day   × 3 days = 30 cents            ✅ with integers       │
//! │                                                                         │
//! │  The sweep and the return path must agree to the cent, so every        │
//! │  amount is an i64 count of minor units.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use libris_core::money::Money;
//!
//! let rate = Money::from_cents(25);     // 0.25 per overdue day
//! let owed = rate.times_days(4);        // 1.00
//! assert_eq!(owed.cents(), 100);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// ## Design Decisions
/// - **i64 (signed)**: matches the SQLite INTEGER column it is stored in
/// - **Single field tuple struct**: zero-cost wrapper over i64
/// - **Saturating fine math**: a decades-overdue book never wraps to a negative fine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use libris_core::money::Money;
    ///
    /// let fine = Money::from_cents(150);
    /// assert_eq!(fine.cents(), 150);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a per-day rate by a number of days.
    ///
    /// Saturates at `i64::MAX` instead of overflowing.
    ///
    /// ## Example
    /// ```rust
    /// use libris_core::money::Money;
    ///
    /// let rate = Money::from_cents(10);
    /// assert_eq!(rate.times_days(3).cents(), 30);
    /// assert_eq!(rate.times_days(0).cents(), 0);
    /// ```
    #[inline]
    pub const fn times_days(&self, days: i64) -> Self {
        Money(self.0.saturating_mul(days))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display for logs and audit detail text.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
