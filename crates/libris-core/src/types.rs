//! # Domain Types
//!
//! Core domain types used throughout Libris.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐ 1   * ┌─────────────────┐                         │
//! │  │   BookTitle     │───────│    BookCopy     │                         │
//! │  │  ─────────────  │       │  ─────────────  │                         │
//! │  │  title, author  │       │  serial (uniq)  │                         │
//! │  │  category       │       │  status         │◄──┐                     │
//! │  │  due period     │       └─────────────────┘   │ at most one open    │
//! │  └─────────────────┘                             │                     │
//! │                            ┌─────────────────┐   │                     │
//! │  ┌─────────────────┐ 1   * │  BorrowRecord   │───┘                     │
//! │  │    Student      │───────│  ─────────────  │                         │
//! │  │  ─────────────  │       │  borrowed_at    │                         │
//! │  │  student_number │       │  due_at         │                         │
//! │  │  blacklist      │       │  returned_at?   │                         │
//! │  └─────────────────┘       │  fine_cents     │                         │
//! │                            └─────────────────┘                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  AuditEntry: append-only, never consulted for current state     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4, immutable, used for relations
//! - Business ID: (copy serial, student number) human-readable

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::fine;
use crate::identity::VerificationMethod;
use crate::money::Money;
use crate::period::LoanPeriod;

// =============================================================================
// Book Title
// =============================================================================

/// A catalogued work. Physical copies hang off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookTitle {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display title.
    pub title: String,

    pub author: String,

    /// Shelf category (e.g. "Fiction", "Science").
    pub category: String,

    /// Loan period used when an issue request doesn't name one.
    pub default_period: LoanPeriod,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Book Copy
// =============================================================================

/// Availability of a physical copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    /// On the shelf.
    #[default]
    Available,
    /// Referenced by exactly one open borrow record.
    Borrowed,
}

/// One physical, individually trackable copy of a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookCopy {
    pub id: String,

    /// Title this copy belongs to.
    pub title_id: String,

    /// Physical identifier printed on the copy (barcode / accession number).
    pub serial: String,

    pub status: CopyStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookCopy {
    /// Checks if the copy is on the shelf.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.status == CopyStatus::Available
    }
}

// =============================================================================
// Student
// =============================================================================

/// Blacklist attribute of a student.
///
/// ## State Machine
/// ```text
///                  sweep flags overdue record
///   ┌─────────┐ ──────────────────────────────► ┌──────────────────────────┐
///   │  Clear  │                                  │ Blacklisted(until,reason)│
///   └─────────┘ ◄────────────────────────────── └──────────────────────────┘
///                 until <= now (lazy, on read)
///                 or admin Unblacklist
/// ```
/// There is no Blacklisted → Blacklisted edge: an active window is never
/// reset, extended or shortened by further overdue events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BlacklistState {
    #[default]
    Clear,
    Blacklisted {
        until: DateTime<Utc>,
        reason: String,
    },
}

impl BlacklistState {
    /// Builds the state from the two nullable storage columns.
    ///
    /// A half-filled pair (until without reason) is still treated as a
    /// blacklist, with an empty reason.
    pub fn from_columns(until: Option<DateTime<Utc>>, reason: Option<String>) -> Self {
        match until {
            Some(until) => BlacklistState::Blacklisted {
                until,
                reason: reason.unwrap_or_default(),
            },
            None => BlacklistState::Clear,
        }
    }

    /// Returns the state as observed at `now`.
    ///
    /// A window whose `until` is at or before `now` has expired and reads
    /// as `Clear`.
    pub fn effective_at(&self, now: DateTime<Utc>) -> BlacklistState {
        match self {
            BlacklistState::Blacklisted { until, .. } if *until <= now => BlacklistState::Clear,
            other => other.clone(),
        }
    }

    /// Returns true if a window is active at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.effective_at(now), BlacklistState::Blacklisted { .. })
    }

    /// Returns true if the stored value is a window that has already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, BlacklistState::Blacklisted { until, .. } if *until <= now)
    }

    /// End of the window, if any.
    pub fn until(&self) -> Option<DateTime<Utc>> {
        match self {
            BlacklistState::Blacklisted { until, .. } => Some(*until),
            BlacklistState::Clear => None,
        }
    }
}

/// A library member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,

    /// School-issued number printed on the library card.
    pub student_number: String,

    pub full_name: String,

    /// Class or form (e.g. "7B").
    pub class_name: Option<String>,

    pub email: Option<String>,

    /// Stored blacklist attribute. May hold an expired window until the
    /// next read clears it; use [`Student::blacklist_at`] for decisions.
    pub blacklist: BlacklistState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    /// Effective blacklist state at `now`.
    pub fn blacklist_at(&self, now: DateTime<Utc>) -> BlacklistState {
        self.blacklist.effective_at(now)
    }

    /// Fails with [`CoreError::StudentBlacklisted`] if a window is active.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::{Duration, Utc};
    /// use libris_core::{BlacklistState, Student};
    ///
    /// let now = Utc::now();
    /// let mut student = Student {
    ///     id: "s-1".into(),
    ///     student_number: "2024-001".into(),
    ///     full_name: "Ada".into(),
    ///     class_name: None,
    ///     email: None,
    ///     blacklist: BlacklistState::Clear,
    ///     created_at: now,
    ///     updated_at: now,
    /// };
    /// assert!(student.ensure_may_borrow(now).is_ok());
    ///
    /// student.blacklist = BlacklistState::Blacklisted {
    ///     until: now + Duration::days(3),
    ///     reason: "Overdue".into(),
    /// };
    /// assert!(student.ensure_may_borrow(now).is_err());
    /// assert!(student.ensure_may_borrow(now + Duration::days(3)).is_ok());
    /// ```
    pub fn ensure_may_borrow(&self, now: DateTime<Utc>) -> CoreResult<()> {
        match self.blacklist_at(now) {
            BlacklistState::Clear => Ok(()),
            BlacklistState::Blacklisted { until, reason } => Err(CoreError::StudentBlacklisted {
                student_id: self.id.clone(),
                until,
                reason,
            }),
        }
    }
}

// =============================================================================
// Borrow Record
// =============================================================================

/// Lifecycle status of a borrow record. `Returned` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    #[default]
    Borrowed,
    Returned,
}

/// One allocation of a copy to a student. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowRecord {
    pub id: String,
    pub copy_id: String,
    pub student_id: String,

    pub borrowed_at: DateTime<Utc>,

    /// borrowed_at + loan period, fixed at issue.
    pub due_at: DateTime<Utc>,

    pub returned_at: Option<DateTime<Utc>>,

    pub status: BorrowStatus,

    /// Fine fixed at return. Zero while the record is open.
    pub fine_cents: i64,

    /// When the fine was settled, if it was.
    pub fine_paid_at: Option<DateTime<Utc>>,

    /// First time the overdue sweep saw this record past due.
    pub overdue_since: Option<DateTime<Utc>>,

    /// How the borrower's identity was confirmed at the desk.
    pub verified_by: VerificationMethod,
}

impl BorrowRecord {
    /// Checks if the book is still out.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == BorrowStatus::Borrowed
    }

    /// Checks if the record is open and past due at `now`.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_at < now
    }

    /// Returns the fine fixed at return as Money.
    #[inline]
    pub fn fine(&self) -> Money {
        Money::from_cents(self.fine_cents)
    }

    /// The fine-paid flag.
    #[inline]
    pub fn fine_paid(&self) -> bool {
        self.fine_paid_at.is_some()
    }

    /// Fine owed at `now`.
    ///
    /// Open records accrue through the fine calculator; returned records
    /// report the amount fixed at return.
    pub fn accrued_fine(&self, now: DateTime<Utc>, rate_per_day: Money) -> Money {
        match self.returned_at {
            Some(_) => self.fine(),
            None => fine::fine(self.due_at, now, rate_per_day),
        }
    }

    /// Fails with [`CoreError::AlreadyReturned`] unless the record is open.
    pub fn ensure_open(&self) -> CoreResult<()> {
        match (self.status, self.returned_at) {
            (BorrowStatus::Borrowed, _) => Ok(()),
            (BorrowStatus::Returned, returned_at) => Err(CoreError::AlreadyReturned {
                record_id: self.id.clone(),
                returned_at: returned_at.unwrap_or(self.borrowed_at),
            }),
        }
    }

    /// Checks that the record has an unpaid fine that can be settled.
    pub fn ensure_fine_settleable(&self) -> CoreResult<()> {
        if self.is_open() {
            return Err(CoreError::RecordStillOpen {
                record_id: self.id.clone(),
            });
        }
        if let Some(paid_at) = self.fine_paid_at {
            return Err(CoreError::FineAlreadyPaid {
                record_id: self.id.clone(),
                paid_at,
            });
        }
        if !self.fine().is_positive() {
            return Err(CoreError::NoFineOutstanding {
                record_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Audit Trail
// =============================================================================

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    IdentityVerified,
    VerificationFailed,
    BookIssued,
    BookReturned,
    OverdueFlagged,
    AutoBlacklist,
    BlacklistExpired,
    AdminUnblacklist,
    FinePaid,
}

impl AuditKind {
    /// Stored name, matching the sqlx/serde representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditKind::IdentityVerified => "identity_verified",
            AuditKind::VerificationFailed => "verification_failed",
            AuditKind::BookIssued => "book_issued",
            AuditKind::BookReturned => "book_returned",
            AuditKind::OverdueFlagged => "overdue_flagged",
            AuditKind::AutoBlacklist => "auto_blacklist",
            AuditKind::BlacklistExpired => "blacklist_expired",
            AuditKind::AdminUnblacklist => "admin_unblacklist",
            AuditKind::FinePaid => "fine_paid",
        }
    }
}

/// An entry in the append-only audit trail.
///
/// For compliance and troubleshooting only. Current state always comes
/// from the ledger and the student blacklist attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub kind: AuditKind,
    pub student_id: String,
    pub copy_id: Option<String>,
    pub record_id: Option<String>,
    /// Human-readable description.
    pub detail: String,
    /// JSON snapshot of the entity the event is about.
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An audit event before it gets an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub kind: AuditKind,
    pub student_id: String,
    pub copy_id: Option<String>,
    pub record_id: Option<String>,
    pub detail: String,
    pub payload: Option<String>,
}

impl NewAuditEntry {
    /// Starts an entry about a student.
    pub fn new(kind: AuditKind, student_id: impl Into<String>, detail: impl Into<String>) -> Self {
        NewAuditEntry {
            kind,
            student_id: student_id.into(),
            copy_id: None,
            record_id: None,
            detail: detail.into(),
            payload: None,
        }
    }

    /// Attaches the copy the event concerns.
    pub fn copy(mut self, copy_id: impl Into<String>) -> Self {
        self.copy_id = Some(copy_id.into());
        self
    }

    /// Attaches the borrow record the event concerns.
    pub fn record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Attaches a JSON snapshot of `value`.
    ///
    /// Serialization failures drop the payload; the detail text still
    /// describes the event.
    pub fn snapshot<T: Serialize>(mut self, value: &T) -> Self {
        self.payload = serde_json::to_string(value).ok();
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap()
    }

    fn record() -> BorrowRecord {
        BorrowRecord {
            id: "rec-1".to_string(),
            copy_id: "copy-1".to_string(),
            student_id: "stu-1".to_string(),
            borrowed_at: now() - Duration::days(10),
            due_at: now() - Duration::days(3),
            returned_at: None,
            status: BorrowStatus::Borrowed,
            fine_cents: 0,
            fine_paid_at: None,
            overdue_since: None,
            verified_by: VerificationMethod::Fingerprint,
        }
    }

    #[test]
    fn test_blacklist_expires_on_read() {
        let state = BlacklistState::Blacklisted {
            until: now(),
            reason: "Overdue".to_string(),
        };
        assert!(state.is_active_at(now() - Duration::seconds(1)));
        assert!(!state.is_active_at(now()));
        assert!(state.is_expired_at(now()));
        assert_eq!(state.effective_at(now()), BlacklistState::Clear);
    }

    #[test]
    fn test_blacklist_from_columns() {
        assert_eq!(BlacklistState::from_columns(None, None), BlacklistState::Clear);
        assert_eq!(
            BlacklistState::from_columns(Some(now()), None),
            BlacklistState::Blacklisted {
                until: now(),
                reason: String::new()
            }
        );
    }

    #[test]
    fn test_open_record_accrues_fine() {
        let rec = record();
        assert!(rec.is_overdue_at(now()));
        assert_eq!(rec.accrued_fine(now(), Money::from_cents(10)).cents(), 30);
    }

    #[test]
    fn test_returned_record_reports_fixed_fine() {
        let mut rec = record();
        rec.status = BorrowStatus::Returned;
        rec.returned_at = Some(now() - Duration::days(1));
        rec.fine_cents = 20;
        assert!(!rec.is_overdue_at(now()));
        assert_eq!(rec.accrued_fine(now() + Duration::days(9), Money::from_cents(10)).cents(), 20);
        assert!(matches!(rec.ensure_open(), Err(CoreError::AlreadyReturned { .. })));
    }

    #[test]
    fn test_fine_settlement_rules() {
        let mut rec = record();
        assert!(matches!(
            rec.ensure_fine_settleable(),
            Err(CoreError::RecordStillOpen { .. })
        ));

        rec.status = BorrowStatus::Returned;
        rec.returned_at = Some(now());
        assert!(matches!(
            rec.ensure_fine_settleable(),
            Err(CoreError::NoFineOutstanding { .. })
        ));

        rec.fine_cents = 30;
        assert!(rec.ensure_fine_settleable().is_ok());

        rec.fine_paid_at = Some(now());
        assert!(matches!(
            rec.ensure_fine_settleable(),
            Err(CoreError::FineAlreadyPaid { .. })
        ));
    }

    #[test]
    fn test_audit_entry_builder() {
        let entry = NewAuditEntry::new(AuditKind::BookIssued, "stu-1", "Issued")
            .copy("copy-1")
            .record("rec-1")
            .snapshot(&record());
        assert_eq!(entry.copy_id.as_deref(), Some("copy-1"));
        assert_eq!(entry.record_id.as_deref(), Some("rec-1"));
        assert!(entry.payload.unwrap().contains("\"copy_id\":\"copy-1\""));
        assert_eq!(AuditKind::AdminUnblacklist.as_str(), "admin_unblacklist");
    }
}
