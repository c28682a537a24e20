//! # Borrow Record Repository
//!
//! The lending ledger. Records are inserted at issue, closed once at
//! return, and never deleted (a trigger rejects DELETE).
//!
//! ## Record Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  insert_in ──► borrowed ──── touch_open_in + flag_overdue_in (sweep) ┐  │
//! │                   │                                                  │  │
//! │                   │ close_in (CAS: WHERE status = 'borrowed')        │  │
//! │                   │ set_fine_in                                      │  │
//! │                   ▼                                                  │  │
//! │               returned ◄─────────────────────────────────────────────┘  │
//! │                   │                                                     │
//! │                   └── mark_fine_paid_in (once, fine_cents > 0)         │
//! │                                                                         │
//! │  Partial unique index: at most one 'borrowed' row per copy_id.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use libris_core::{BorrowRecord, BorrowStatus, VerificationMethod};

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: String,
    copy_id: String,
    student_id: String,
    borrowed_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
    status: BorrowStatus,
    fine_cents: i64,
    fine_paid_at: Option<DateTime<Utc>>,
    overdue_since: Option<DateTime<Utc>>,
    verified_by: VerificationMethod,
}

impl From<RecordRow> for BorrowRecord {
    fn from(row: RecordRow) -> Self {
        BorrowRecord {
            id: row.id,
            copy_id: row.copy_id,
            student_id: row.student_id,
            borrowed_at: row.borrowed_at,
            due_at: row.due_at,
            returned_at: row.returned_at,
            status: row.status,
            fine_cents: row.fine_cents,
            fine_paid_at: row.fine_paid_at,
            overdue_since: row.overdue_since,
            verified_by: row.verified_by,
        }
    }
}

const RECORD_COLUMNS: &str = "id, copy_id, student_id, borrowed_at, due_at, returned_at, \
     status, fine_cents, fine_paid_at, overdue_since, verified_by";

/// An open record joined with the copy and title it lends out.
///
/// What the overdue sweep needs to word a blacklist reason.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OpenLoan {
    pub record_id: String,
    pub copy_id: String,
    pub student_id: String,
    pub due_at: DateTime<Utc>,
    pub overdue_since: Option<DateTime<Utc>>,
    pub serial: String,
    pub title: String,
}

/// Repository for borrow record operations.
#[derive(Debug, Clone)]
pub struct BorrowRepository {
    pool: SqlitePool,
}

impl BorrowRepository {
    /// Creates a new BorrowRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BorrowRepository { pool }
    }

    /// Gets a record by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<BorrowRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BorrowRecord::from))
    }

    /// Gets the open record for a copy, if it is out.
    pub async fn open_for_copy(&self, copy_id: &str) -> DbResult<Option<BorrowRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records \
             WHERE copy_id = ?1 AND status = 'borrowed'"
        ))
        .bind(copy_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BorrowRecord::from))
    }

    /// Full history of a copy, newest first.
    pub async fn list_for_copy(&self, copy_id: &str) -> DbResult<Vec<BorrowRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records \
             WHERE copy_id = ?1 ORDER BY borrowed_at DESC"
        ))
        .bind(copy_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BorrowRecord::from).collect())
    }

    /// Full history of a student, newest first.
    pub async fn list_for_student(&self, student_id: &str) -> DbResult<Vec<BorrowRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records \
             WHERE student_id = ?1 ORDER BY borrowed_at DESC"
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BorrowRecord::from).collect())
    }

    /// A student's open records, oldest due date first.
    pub async fn list_open_for_student(&self, student_id: &str) -> DbResult<Vec<BorrowRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records \
             WHERE student_id = ?1 AND status = 'borrowed' ORDER BY due_at"
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BorrowRecord::from).collect())
    }

    /// Every open record with its copy serial and title.
    ///
    /// Due-date filtering happens in the caller against its own clock.
    pub async fn list_open_loans(&self) -> DbResult<Vec<OpenLoan>> {
        let loans: Vec<OpenLoan> = sqlx::query_as(
            r#"
            SELECT
                r.id AS record_id,
                r.copy_id,
                r.student_id,
                r.due_at,
                r.overdue_since,
                c.serial,
                t.title
            FROM borrow_records r
            JOIN book_copies c ON c.id = r.copy_id
            JOIN book_titles t ON t.id = c.title_id
            WHERE r.status = 'borrowed'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    /// Counts open records for one copy. Never more than one.
    pub async fn count_open_for_copy(&self, copy_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrow_records WHERE copy_id = ?1 AND status = 'borrowed'",
        )
        .bind(copy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Transaction-scoped helpers
    // -------------------------------------------------------------------------

    /// Gets a record on the caller's transaction.
    pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<BorrowRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(BorrowRecord::from))
    }

    /// Inserts a freshly issued record.
    ///
    /// ## Errors
    /// `UniqueViolation` on `borrow_records.copy_id` if the copy already has
    /// an open record.
    pub async fn insert_in(conn: &mut SqliteConnection, record: &BorrowRecord) -> DbResult<()> {
        debug!(
            id = %record.id,
            copy_id = %record.copy_id,
            student_id = %record.student_id,
            due_at = %record.due_at,
            "Inserting borrow record"
        );

        sqlx::query(
            r#"
            INSERT INTO borrow_records (
                id, copy_id, student_id,
                borrowed_at, due_at, returned_at,
                status, fine_cents, fine_paid_at, overdue_since, verified_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&record.id)
        .bind(&record.copy_id)
        .bind(&record.student_id)
        .bind(record.borrowed_at)
        .bind(record.due_at)
        .bind(record.returned_at)
        .bind(record.status)
        .bind(record.fine_cents)
        .bind(record.fine_paid_at)
        .bind(record.overdue_since)
        .bind(record.verified_by)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Compare-and-swap `borrowed → returned`.
    ///
    /// This is the first write of a return transaction. The closed row comes
    /// back so the caller can price the fine against `due_at` while holding
    /// the write lock, then fix it with [`BorrowRepository::set_fine_in`].
    ///
    /// ## Returns
    /// `None` if the record is missing or already returned.
    pub async fn close_in(
        conn: &mut SqliteConnection,
        id: &str,
        returned_at: DateTime<Utc>,
    ) -> DbResult<Option<BorrowRecord>> {
        debug!(id = %id, "Closing borrow record");

        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "UPDATE borrow_records SET status = 'returned', returned_at = ?2 \
             WHERE id = ?1 AND status = 'borrowed' RETURNING {RECORD_COLUMNS}"
        ))
        .bind(id)
        .bind(returned_at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(BorrowRecord::from))
    }

    /// Fixes the fine on a record closed in the same transaction.
    pub async fn set_fine_in(conn: &mut SqliteConnection, id: &str, fine_cents: i64) -> DbResult<()> {
        sqlx::query("UPDATE borrow_records SET fine_cents = ?2 WHERE id = ?1 AND status = 'returned'")
            .bind(id)
            .bind(fine_cents)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Takes the write lock on an open record without changing it.
    ///
    /// ## Returns
    /// `false` if the record is returned or missing.
    pub async fn touch_open_in(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result =
            sqlx::query("UPDATE borrow_records SET status = status WHERE id = ?1 AND status = 'borrowed'")
                .bind(id)
                .execute(&mut *conn)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Sets `overdue_since` on an open, unflagged record.
    ///
    /// ## Returns
    /// `false` if the record was returned or flagged in the meantime.
    pub async fn flag_overdue_in(
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE borrow_records
            SET overdue_since = ?2
            WHERE id = ?1 AND status = 'borrowed' AND overdue_since IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Sets `fine_paid_at` on a returned record with an unpaid positive fine.
    pub async fn mark_fine_paid_in(
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE borrow_records
            SET fine_paid_at = ?2
            WHERE id = ?1
              AND status = 'returned'
              AND fine_cents > 0
              AND fine_paid_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Generates a new borrow record ID.
pub fn generate_record_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
