//! # Library Policy
//!
//! Policy values (fine rate, blacklist window, default loan period) and the
//! blacklist decision made by the overdue sweep.
//!
//! `LibraryPolicy` is an ordinary value. The engine builds it from
//! configuration and passes it into every call that needs it; nothing in
//! this crate reads settings from global state.
//!
//! ## Blacklist Decision
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  decide_blacklist(student, record, now)                                 │
//! │                                                                         │
//! │  record returned?            ──► NotApplicable (race with Return)       │
//! │  record not past due?        ──► NotApplicable                          │
//! │  student window active?      ──► AlreadyActive { until }  (no change)   │
//! │  otherwise                   ──► Apply { until: now + window, reason }  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::period::LoanPeriod;
use crate::types::{BlacklistState, BorrowRecord, Student};
use crate::{fine, DEFAULT_BLACKLIST_WINDOW_DAYS, DEFAULT_FINE_RATE_CENTS};

/// Policy values threaded into the fine calculator and blacklist decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryPolicy {
    /// Charged per started overdue day.
    pub fine_rate_per_day: Money,

    /// Length of an automatic blacklist, in days.
    pub blacklist_window_days: i64,

    /// Loan period for titles created without one.
    pub default_period: LoanPeriod,
}

impl Default for LibraryPolicy {
    fn default() -> Self {
        LibraryPolicy {
            fine_rate_per_day: Money::from_cents(DEFAULT_FINE_RATE_CENTS),
            blacklist_window_days: DEFAULT_BLACKLIST_WINDOW_DAYS,
            default_period: LoanPeriod::default(),
        }
    }
}

/// Outcome of [`LibraryPolicy::decide_blacklist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistDecision {
    /// Open a fresh window.
    Apply { until: DateTime<Utc>, reason: String },
    /// Student already has an active window; it is left untouched.
    AlreadyActive { until: DateTime<Utc> },
    /// Record is returned or not yet overdue.
    NotApplicable,
}

/// Details of the overdue book used to word the blacklist reason.
#[derive(Debug, Clone, Copy)]
pub struct OverdueBook<'a> {
    pub title: &'a str,
    pub serial: &'a str,
}

impl LibraryPolicy {
    /// The blacklist window as a duration.
    pub fn blacklist_window(&self) -> Duration {
        Duration::days(self.blacklist_window_days)
    }

    /// Fine owed on `record` at `now`, via the fine calculator.
    pub fn fine_for(&self, record: &BorrowRecord, now: DateTime<Utc>) -> Money {
        record.accrued_fine(now, self.fine_rate_per_day)
    }

    /// Fine for a record due at `due` and returned at `returned_at`.
    pub fn fine_at_return(&self, due: DateTime<Utc>, returned_at: DateTime<Utc>) -> Money {
        fine::fine(due, returned_at, self.fine_rate_per_day)
    }

    /// Decides what the sweep does to `student` for overdue `record`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// match policy.decide_blacklist(&student, &record, book, now) {
    ///     BlacklistDecision::Apply { until, reason } => { /* write window */ }
    ///     BlacklistDecision::AlreadyActive { .. } => { /* leave alone */ }
    ///     BlacklistDecision::NotApplicable => {}
    /// }
    /// ```
    pub fn decide_blacklist(
        &self,
        student: &Student,
        record: &BorrowRecord,
        book: OverdueBook<'_>,
        now: DateTime<Utc>,
    ) -> BlacklistDecision {
        if !record.is_overdue_at(now) {
            return BlacklistDecision::NotApplicable;
        }

        match student.blacklist_at(now) {
            BlacklistState::Blacklisted { until, .. } => BlacklistDecision::AlreadyActive { until },
            BlacklistState::Clear => BlacklistDecision::Apply {
                until: now + self.blacklist_window(),
                reason: auto_blacklist_reason(book, record),
            },
        }
    }
}

/// Reason text stored on an automatic blacklist.
pub fn auto_blacklist_reason(book: OverdueBook<'_>, record: &BorrowRecord) -> String {
    format!(
        "Overdue book \"{}\" (copy {}, record {}) was due {}",
        book.title,
        book.serial,
        record.id,
        record.due_at.format("%Y-%m-%d %H:%M UTC")
    )
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::VerificationMethod;
    use crate::types::BorrowStatus;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 8, 0, 0).unwrap()
    }

    fn student(blacklist: BlacklistState) -> Student {
        Student {
            id: "stu-1".to_string(),
            student_number: "2024-001".to_string(),
            full_name: "Grace Hopper".to_string(),
            class_name: Some("8A".to_string()),
            email: None,
            blacklist,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn record(due_at: DateTime<Utc>) -> BorrowRecord {
        BorrowRecord {
            id: "rec-1".to_string(),
            copy_id: "copy-1".to_string(),
            student_id: "stu-1".to_string(),
            borrowed_at: due_at - Duration::days(1),
            due_at,
            returned_at: None,
            status: BorrowStatus::Borrowed,
            fine_cents: 0,
            fine_paid_at: None,
            overdue_since: None,
            verified_by: VerificationMethod::Face,
        }
    }

    const BOOK: OverdueBook<'static> = OverdueBook {
        title: "Dune",
        serial: "DUNE-0001",
    };

    #[test]
    fn test_clear_student_gets_fresh_window() {
        let policy = LibraryPolicy::default();
        let now = t0() + Duration::days(2);
        let decision = policy.decide_blacklist(&student(BlacklistState::Clear), &record(t0()), BOOK, now);

        match decision {
            BlacklistDecision::Apply { until, reason } => {
                assert_eq!(until, now + Duration::days(14));
                assert!(reason.contains("Dune"));
                assert!(reason.contains("DUNE-0001"));
                assert!(reason.contains("rec-1"));
            }
            other => panic!("expected Apply, got {:?}", other),
        }
    }

    #[test]
    fn test_active_window_is_not_touched() {
        let policy = LibraryPolicy::default();
        let now = t0() + Duration::days(2);
        let until = now + Duration::days(5);
        let s = student(BlacklistState::Blacklisted {
            until,
            reason: "earlier".to_string(),
        });

        assert_eq!(
            policy.decide_blacklist(&s, &record(t0()), BOOK, now),
            BlacklistDecision::AlreadyActive { until }
        );
    }

    #[test]
    fn test_expired_window_counts_as_clear() {
        let policy = LibraryPolicy::default();
        let now = t0() + Duration::days(2);
        let s = student(BlacklistState::Blacklisted {
            until: now - Duration::hours(1),
            reason: "old".to_string(),
        });

        assert!(matches!(
            policy.decide_blacklist(&s, &record(t0()), BOOK, now),
            BlacklistDecision::Apply { .. }
        ));
    }

    #[test]
    fn test_returned_or_not_due_records_are_skipped() {
        let policy = LibraryPolicy::default();
        let now = t0() + Duration::days(2);
        let s = student(BlacklistState::Clear);

        let mut returned = record(t0());
        returned.status = BorrowStatus::Returned;
        returned.returned_at = Some(now);
        assert_eq!(
            policy.decide_blacklist(&s, &returned, BOOK, now),
            BlacklistDecision::NotApplicable
        );

        let not_due = record(now + Duration::days(1));
        assert_eq!(
            policy.decide_blacklist(&s, &not_due, BOOK, now),
            BlacklistDecision::NotApplicable
        );
    }

    #[test]
    fn test_fine_for_uses_policy_rate() {
        let policy = LibraryPolicy {
            fine_rate_per_day: Money::from_cents(25),
            ..LibraryPolicy::default()
        };
        let rec = record(t0());
        assert_eq!(policy.fine_for(&rec, t0() + Duration::hours(30)).cents(), 50);
    }
}
