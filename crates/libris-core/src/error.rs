//! # Error Types
//!
//! Domain-specific error types for libris-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  libris-core errors (this file)                                        │
//! │  ├── CoreError        - Lending rule violations                        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  libris-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  libris-lending errors (engine boundary)                               │
//! │  └── LendingError     - What callers see (kind + structured detail)    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError ─┐                                  │
//! │                          DbError ───┴──► LendingError → Caller         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Lending rule violations.
///
/// Each variant carries the ids and timestamps a caller needs to render a
/// specific message without re-querying state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Student has a blacklist window that has not expired yet.
    ///
    /// ## When This Occurs
    /// - Issue for a student auto-blacklisted by the overdue sweep
    /// - The window ends at `until`; after that the student is clear again
    ///
    /// ## User Workflow
    /// ```text
    /// Issue(copy, student)
    ///      │
    ///      ▼
    /// Check blacklist: until = 2024-03-15, reason = "Overdue ..."
    ///      │
    ///      ▼
    /// StudentBlacklisted { student_id, until, reason }
    ///      │
    ///      ▼
    /// Desk shows: "Borrowing suspended until 15 Mar: Overdue ..."
    /// ```
    #[error("Student {student_id} is blacklisted until {until}: {reason}")]
    StudentBlacklisted {
        student_id: String,
        until: DateTime<Utc>,
        reason: String,
    },

    /// Borrow record was already closed by an earlier return.
    #[error("Borrow record {record_id} was already returned at {returned_at}")]
    AlreadyReturned {
        record_id: String,
        returned_at: DateTime<Utc>,
    },

    /// Operation needs a returned record but the book is still out.
    #[error("Borrow record {record_id} is still open")]
    RecordStillOpen { record_id: String },

    /// Record has no fine left to settle.
    #[error("Borrow record {record_id} has no outstanding fine")]
    NoFineOutstanding { record_id: String },

    /// Fine on the record was settled before.
    #[error("Fine for borrow record {record_id} was already paid at {paid_at}")]
    FineAlreadyPaid {
        record_id: String,
        paid_at: DateTime<Utc>,
    },

    /// Due date would fall outside the representable calendar.
    #[error("Due date overflow: {start} + {period}")]
    DueDateOverflow { start: DateTime<Utc>, period: String },

    /// Title attributes are frozen once physical copies exist.
    ///
    /// ## When This Occurs
    /// - Editing title/author/category after the first copy was registered
    /// - Due-period edits are still allowed
    #[error("Title {title_id} has {copies} copies and can no longer be edited")]
    TitleLocked { title_id: String, copies: i64 },

    /// Bad input surfaced through a domain call (e.g. period parsing).
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Caller input rejected before any storage work runs.
///
/// `field` is the human name of the input ("serial", "period value") so the
/// desk can point at the offending box.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    Required { field: String },

    #[error("{field} is longer than {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must lie in {min}..={max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Zero or negative where only a positive count makes sense.
    #[error("{field} must be greater than zero")]
    MustBePositive { field: String },

    #[error("{field} is malformed: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Not one of a closed set, e.g. an unknown period unit.
    #[error("{field} must be one of {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

pub type CoreResult<T> = Result<T, CoreError>;
