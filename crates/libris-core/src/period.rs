//! # Loan Periods
//!
//! Loan periods and the due-date arithmetic built on them.
//!
//! ## Calendar Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Unit     How it is added            Example (borrowed 2024-01-31 00:00)│
//! │  ───────  ─────────────────────────  ─────────────────────────────────  │
//! │  hours    fixed 3600s steps          (36, hours)  → 2024-02-01 12:00    │
//! │  days     fixed 24h steps            (1, days)    → 2024-02-01 00:00    │
//! │  weeks    fixed 7×24h steps          (2, weeks)   → 2024-02-14 00:00    │
//! │  months   calendar, day clamped      (1, months)  → 2024-02-29 00:00    │
//! │  years    12 calendar months         (1, years)   → 2025-01-31 00:00    │
//! │                                                                         │
//! │  Clamping: when the target month is shorter than the start day,        │
//! │  the due date lands on the target month's last day. It never spills   │
//! │  into the following month.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All timestamps are UTC, so "days" never meet a DST transition.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::MAX_PERIOD_VALUE;

// =============================================================================
// Period Unit
// =============================================================================

/// Unit of a loan period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl PeriodUnit {
    /// All units, in ascending size.
    pub const ALL: [PeriodUnit; 5] = [
        PeriodUnit::Hours,
        PeriodUnit::Days,
        PeriodUnit::Weeks,
        PeriodUnit::Months,
        PeriodUnit::Years,
    ];

    /// Canonical lowercase plural name, as stored in the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeriodUnit::Hours => "hours",
            PeriodUnit::Days => "days",
            PeriodUnit::Weeks => "weeks",
            PeriodUnit::Months => "months",
            PeriodUnit::Years => "years",
        }
    }
}

impl fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodUnit {
    type Err = ValidationError;

    /// Accepts singular and plural spellings, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hours" => Ok(PeriodUnit::Hours),
            "day" | "days" => Ok(PeriodUnit::Days),
            "week" | "weeks" => Ok(PeriodUnit::Weeks),
            "month" | "months" => Ok(PeriodUnit::Months),
            "year" | "years" => Ok(PeriodUnit::Years),
            _ => Err(ValidationError::NotAllowed {
                field: "period unit".to_string(),
                allowed: PeriodUnit::ALL.iter().map(|u| u.to_string()).collect(),
            }),
        }
    }
}

// =============================================================================
// Loan Period
// =============================================================================

/// A validated loan period: a positive value in one unit.
///
/// Construct with [`LoanPeriod::new`] or [`LoanPeriod::parse`]; both reject
/// zero, negative, and absurdly large values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoanPeriod {
    value: i64,
    unit: PeriodUnit,
}

impl LoanPeriod {
    /// Creates a loan period after checking the value range.
    ///
    /// ## Example
    /// ```rust
    /// use libris_core::period::{LoanPeriod, PeriodUnit};
    ///
    /// assert!(LoanPeriod::new(14, PeriodUnit::Days).is_ok());
    /// assert!(LoanPeriod::new(0, PeriodUnit::Days).is_err());
    /// ```
    pub fn new(value: i64, unit: PeriodUnit) -> Result<Self, ValidationError> {
        if value <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "period value".to_string(),
            });
        }

        if value > MAX_PERIOD_VALUE {
            return Err(ValidationError::OutOfRange {
                field: "period value".to_string(),
                min: 1,
                max: MAX_PERIOD_VALUE,
            });
        }

        Ok(LoanPeriod { value, unit })
    }

    /// Creates a loan period from a raw value and a unit name.
    ///
    /// ## Example
    /// ```rust
    /// use libris_core::period::{LoanPeriod, PeriodUnit};
    ///
    /// let period = LoanPeriod::parse(2, "weeks").unwrap();
    /// assert_eq!(period.unit(), PeriodUnit::Weeks);
    /// assert!(LoanPeriod::parse(2, "fortnights").is_err());
    /// ```
    pub fn parse(value: i64, unit: &str) -> Result<Self, ValidationError> {
        let unit = unit.parse::<PeriodUnit>()?;
        LoanPeriod::new(value, unit)
    }

    /// The number of units.
    #[inline]
    pub const fn value(&self) -> i64 {
        self.value
    }

    /// The unit.
    #[inline]
    pub const fn unit(&self) -> PeriodUnit {
        self.unit
    }

    /// Computes the due timestamp for a loan starting at `start`.
    ///
    /// Month and year units use calendar addition clamped to the last day
    /// of the target month (see the module docs).
    ///
    /// ## Example
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use libris_core::period::LoanPeriod;
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
    /// let due = LoanPeriod::parse(1, "months").unwrap().due_at(start).unwrap();
    /// assert_eq!(due, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
    /// ```
    pub fn due_at(&self, start: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
        let due = match self.unit {
            PeriodUnit::Hours => start.checked_add_signed(Duration::hours(self.value)),
            PeriodUnit::Days => start.checked_add_signed(Duration::days(self.value)),
            PeriodUnit::Weeks => start.checked_add_signed(Duration::weeks(self.value)),
            PeriodUnit::Months => start.checked_add_months(Months::new(self.value as u32)),
            PeriodUnit::Years => start.checked_add_months(Months::new((self.value * 12) as u32)),
        };

        due.ok_or_else(|| CoreError::DueDateOverflow {
            start,
            period: self.to_string(),
        })
    }
}

impl fmt::Display for LoanPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

impl Default for LoanPeriod {
    /// Two weeks, the usual school library loan.
    fn default() -> Self {
        LoanPeriod {
            value: 14,
            unit: PeriodUnit::Days,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
