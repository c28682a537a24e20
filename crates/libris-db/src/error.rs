//! # Storage Errors
//!
//! `DbError` classifies what went wrong below the repositories so the engine
//! can decide between retrying, reporting a conflict, or giving up.
//!
//! ```text
//!  sqlx::Error
//!    ├── Database(e), e.kind() == UniqueViolation  → UniqueViolation { table.column }
//!    ├── Database(e), e.kind() == ForeignKeyViolation → ForeignKeyViolation
//!    ├── Database(e), code SQLITE_BUSY / LOCKED*   → Busy         (transient)
//!    ├── Database(e), anything else                → QueryFailed  (CHECK, trigger RAISE)
//!    ├── PoolTimedOut                              → PoolExhausted (transient)
//!    ├── PoolClosed                                → ConnectionFailed
//!    └── other                                     → Internal
//! ```

use sqlx::error::ErrorKind as SqlxErrorKind;
use thiserror::Error;

/// Result alias for repository calls.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// A row the caller required does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the write.
    ///
    /// ## When This Occurs
    /// - Registering a copy with a serial that already exists
    /// - Registering a duplicate student number
    /// - A second open borrow record for the same copy
    #[error("{field} '{value}' is already taken")]
    UniqueViolation { field: String, value: String },

    /// A referenced title, copy or student is missing.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// SQLite held its lock past `busy_timeout`. Retry with backoff.
    #[error("Database busy: {0}")]
    Busy(String),

    /// The file could not be opened, or the pool is closed.
    #[error("Cannot open database: {0}")]
    ConnectionFailed(String),

    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    /// CHECK constraint, trigger abort or malformed SQL.
    #[error("Statement rejected: {0}")]
    QueryFailed(String),

    /// A stored row could not be turned into a domain value.
    ///
    /// ## When This Occurs
    /// - A title row carries a period the domain rejects
    /// - Manual edits to the database file
    #[error("Corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: String,
        id: String,
        reason: String,
    },

    /// Every pooled connection stayed busy past the acquire timeout.
    #[error("No database connection available")]
    PoolExhausted,

    #[error("Storage failure: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn corrupt(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        DbError::Corrupt {
            entity: entity.into(),
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }

    /// Returns true for a unique violation on `column` (e.g. `"book_copies.serial"`).
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field == column)
    }
}

/// Primary result codes SQLITE_BUSY (5) and SQLITE_LOCKED (6); extended codes
/// keep the primary code in their low byte.
fn is_lock_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

/// `"UNIQUE constraint failed: book_copies.serial"` → `"book_copies.serial"`.
///
/// Composite indexes list several columns; the first one names the index well
/// enough for callers.
fn unique_column(message: &str) -> String {
    message
        .rsplit(": ")
        .next()
        .and_then(|cols| cols.split(',').next())
        .map(|col| col.trim().to_string())
        .unwrap_or_default()
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    SqlxErrorKind::UniqueViolation => DbError::UniqueViolation {
                        field: unique_column(&message),
                        value: String::new(),
                    },
                    SqlxErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { message },
                    _ if db_err.code().is_some_and(|c| is_lock_code(&c)) => DbError::Busy(message),
                    _ => DbError::QueryFailed(message),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),

            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::Busy("database is locked".into()).is_transient());
        assert!(DbError::PoolExhausted.is_transient());
        assert!(!DbError::not_found("Student", "s-1").is_transient());
        assert!(!DbError::QueryFailed("CHECK constraint failed".into()).is_transient());
    }

    #[test]
    fn test_lock_codes() {
        assert!(is_lock_code("5"));
        assert!(is_lock_code("517")); // SQLITE_BUSY_SNAPSHOT
        assert!(is_lock_code("262")); // SQLITE_LOCKED_SHAREDCACHE
        assert!(!is_lock_code("2067")); // SQLITE_CONSTRAINT_UNIQUE
        assert!(!is_lock_code("busy"));
    }

    #[test]
    fn test_unique_column_parsing() {
        assert_eq!(
            unique_column("UNIQUE constraint failed: book_copies.serial"),
            "book_copies.serial"
        );
        assert_eq!(
            unique_column("UNIQUE constraint failed: borrow_records.copy_id, borrow_records.status"),
            "borrow_records.copy_id"
        );

        let err = DbError::duplicate("book_copies.serial", "DUNE-1");
        assert!(err.is_unique_violation_on("book_copies.serial"));
        assert!(!err.is_unique_violation_on("students.student_number"));
    }

    #[test]
    fn test_pool_errors() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::NotFound { .. }));
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }
}
