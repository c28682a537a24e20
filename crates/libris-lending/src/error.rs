//! # Lending Error Types
//!
//! The error taxonomy every engine operation reports through.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Lending Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    NotFound     │  │    Conflict     │  │    PolicyViolation      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  CopyNotFound   │  │ CopyUnavailable │  │  StudentBlacklisted     │ │
//! │  │  StudentUnknown │  │ AlreadyReturned │  │  VerificationFailed     │ │
//! │  │  RecordNotFound │  │ FineNotSettle.. │  │                         │ │
//! │  │  TitleNotFound  │  │ TitleLocked     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transient     │  │    Invalid      │  │      Internal           │ │
//! │  │  (retry me)     │  │                 │  │                         │ │
//! │  │  Timeout        │  │  Validation     │  │  Storage, Config        │ │
//! │  │  StorageBusy    │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only `Transient` errors are worth retrying, see [`crate::retry`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use libris_core::{CoreError, ValidationError};
use libris_db::DbError;

/// Result type alias for lending operations.
pub type LendingResult<T> = Result<T, LendingError>;

/// Coarse failure class a caller branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Copy, student, record or title unknown.
    NotFound,
    /// Lost a race or the entity is in the wrong state.
    Conflict,
    /// A lending rule refused the request.
    PolicyViolation,
    /// Storage timed out or was busy. Safe to retry with backoff.
    Transient,
    /// Bad caller input.
    Invalid,
    /// Infrastructure fault that retrying won't fix.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::Transient => "transient",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Lending error type covering every failure an engine operation reports.
///
/// ## Design Principles
/// - Each variant carries the ids and timestamps needed for a user-facing
///   message, so callers never re-query state to explain a failure
/// - [`LendingError::kind`] maps every variant to exactly one [`ErrorKind`]
#[derive(Debug, Error)]
pub enum LendingError {
    // =========================================================================
    // Not Found
    // =========================================================================
    #[error("Book copy not found: {copy_id}")]
    CopyNotFound { copy_id: String },

    #[error("Student not found: {student_id}")]
    StudentUnknown { student_id: String },

    #[error("Borrow record not found: {record_id}")]
    RecordNotFound { record_id: String },

    #[error("Book title not found: {title_id}")]
    TitleNotFound { title_id: String },

    // =========================================================================
    // Conflict
    // =========================================================================
    /// Copy exists but is out on loan, or the issue race was lost.
    #[error("Book copy {copy_id} is not available")]
    CopyUnavailable { copy_id: String },

    #[error("Borrow record {record_id} was already returned at {returned_at}")]
    AlreadyReturned {
        record_id: String,
        returned_at: DateTime<Utc>,
    },

    /// Fine already paid, nothing owed, or the book is still out.
    #[error("Fine on record {record_id} cannot be settled: {reason}")]
    FineNotSettleable { record_id: String, reason: String },

    #[error("Title {title_id} has {copies} copies and can no longer be edited")]
    TitleLocked { title_id: String, copies: i64 },

    /// Unique key already taken (serial, student number).
    #[error("Duplicate {field}: '{value}' already exists")]
    Duplicate { field: String, value: String },

    // =========================================================================
    // Policy Violation
    // =========================================================================
    #[error("Student {student_id} is blacklisted until {until}: {reason}")]
    StudentBlacklisted {
        student_id: String,
        until: DateTime<Utc>,
        reason: String,
    },

    #[error("Identity verification failed for {student_id}: {reason}")]
    VerificationFailed { student_id: String, reason: String },

    // =========================================================================
    // Transient
    // =========================================================================
    /// Operation exceeded its storage deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// SQLite lock contention or pool exhaustion.
    #[error("Storage busy: {0}")]
    StorageBusy(String),

    // =========================================================================
    // Invalid
    // =========================================================================
    #[error("Invalid input: {0}")]
    Invalid(#[from] ValidationError),

    // =========================================================================
    // Internal
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

// =============================================================================
// Conversions
// =============================================================================

impl From<DbError> for LendingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Busy(msg) => LendingError::StorageBusy(msg),
            DbError::PoolExhausted => LendingError::StorageBusy("connection pool exhausted".into()),
            DbError::UniqueViolation { field, value } => LendingError::Duplicate { field, value },
            DbError::NotFound { entity, id } => match entity.as_str() {
                "Student" => LendingError::StudentUnknown { student_id: id },
                "BorrowRecord" => LendingError::RecordNotFound { record_id: id },
                "BookCopy" => LendingError::CopyNotFound { copy_id: id },
                "BookTitle" => LendingError::TitleNotFound { title_id: id },
                _ => LendingError::Storage(format!("{entity} not found: {id}")),
            },
            other => LendingError::Storage(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for LendingError {
    fn from(err: sqlx::Error) -> Self {
        LendingError::from(DbError::from(err))
    }
}

impl From<CoreError> for LendingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::StudentBlacklisted {
                student_id,
                until,
                reason,
            } => LendingError::StudentBlacklisted {
                student_id,
                until,
                reason,
            },
            CoreError::AlreadyReturned {
                record_id,
                returned_at,
            } => LendingError::AlreadyReturned {
                record_id,
                returned_at,
            },
            CoreError::RecordStillOpen { record_id } => LendingError::FineNotSettleable {
                record_id,
                reason: "book has not been returned".into(),
            },
            CoreError::NoFineOutstanding { record_id } => LendingError::FineNotSettleable {
                record_id,
                reason: "no fine is owed".into(),
            },
            CoreError::FineAlreadyPaid { record_id, paid_at } => LendingError::FineNotSettleable {
                record_id,
                reason: format!("already paid at {paid_at}"),
            },
            CoreError::TitleLocked { title_id, copies } => {
                LendingError::TitleLocked { title_id, copies }
            }
            CoreError::DueDateOverflow { start, period } => {
                LendingError::Invalid(ValidationError::InvalidFormat {
                    field: "period".into(),
                    reason: format!("{start} + {period} is outside the calendar"),
                })
            }
            CoreError::Validation(v) => LendingError::Invalid(v),
        }
    }
}

impl From<std::io::Error> for LendingError {
    fn from(err: std::io::Error) -> Self {
        LendingError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for LendingError {
    fn from(err: toml::de::Error) -> Self {
        LendingError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for LendingError {
    fn from(err: toml::ser::Error) -> Self {
        LendingError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl LendingError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LendingError::CopyNotFound { .. }
            | LendingError::StudentUnknown { .. }
            | LendingError::RecordNotFound { .. }
            | LendingError::TitleNotFound { .. } => ErrorKind::NotFound,

            LendingError::CopyUnavailable { .. }
            | LendingError::AlreadyReturned { .. }
            | LendingError::FineNotSettleable { .. }
            | LendingError::TitleLocked { .. }
            | LendingError::Duplicate { .. } => ErrorKind::Conflict,

            LendingError::StudentBlacklisted { .. } | LendingError::VerificationFailed { .. } => {
                ErrorKind::PolicyViolation
            }

            LendingError::Timeout { .. } | LendingError::StorageBusy(_) => ErrorKind::Transient,

            LendingError::Invalid(_) => ErrorKind::Invalid,

            LendingError::Storage(_)
            | LendingError::InvalidConfig(_)
            | LendingError::ConfigLoadFailed(_)
            | LendingError::ConfigSaveFailed(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the operation can be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            LendingError::InvalidConfig(_)
                | LendingError::ConfigLoadFailed(_)
                | LendingError::ConfigSaveFailed(_)
        )
    }
}
