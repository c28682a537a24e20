//! # Audit Trail Repository
//!
//! Append-only event log for compliance and troubleshooting.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SINGLE TRANSACTION                                                     │
//! │                                                                         │
//! │   1. state change (copy status, record, blacklist columns)             │
//! │   2. AuditRepository::append_in(conn, entry, now)                      │
//! │                                                                         │
//! │  COMMIT ← the event exists iff the change it describes exists          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The table has triggers rejecting UPDATE and DELETE. Nothing in the
//! workspace reads audit rows to decide current state.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use libris_core::{AuditEntry, AuditKind, NewAuditEntry};

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: String,
    kind: AuditKind,
    student_id: String,
    copy_id: Option<String>,
    record_id: Option<String>,
    detail: String,
    payload: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        AuditEntry {
            id: row.id,
            kind: row.kind,
            student_id: row.student_id,
            copy_id: row.copy_id,
            record_id: row.record_id,
            detail: row.detail,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

const AUDIT_COLUMNS: &str =
    "id, kind, student_id, copy_id, record_id, detail, payload, created_at";

/// Repository for audit trail operations.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    /// Creates a new AuditRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    /// Appends an event on its own, for events with no accompanying change
    /// (identity verification outcomes).
    pub async fn append(&self, entry: NewAuditEntry, now: DateTime<Utc>) -> DbResult<AuditEntry> {
        let mut conn = self.pool.acquire().await?;
        Self::append_in(&mut conn, entry, now).await
    }

    /// Appends an event on the caller's transaction.
    pub async fn append_in(
        conn: &mut SqliteConnection,
        entry: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> DbResult<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            kind: entry.kind,
            student_id: entry.student_id,
            copy_id: entry.copy_id,
            record_id: entry.record_id,
            detail: entry.detail,
            payload: entry.payload,
            created_at: now,
        };

        debug!(
            kind = entry.kind.as_str(),
            student_id = %entry.student_id,
            record_id = ?entry.record_id,
            "Appending audit event"
        );

        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, kind, student_id, copy_id, record_id, detail, payload, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.kind)
        .bind(&entry.student_id)
        .bind(&entry.copy_id)
        .bind(&entry.record_id)
        .bind(&entry.detail)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(entry)
    }

    /// Events about a student, newest first.
    pub async fn list_for_student(&self, student_id: &str, limit: u32) -> DbResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events \
             WHERE student_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        ))
        .bind(student_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    /// Events about a borrow record, oldest first.
    pub async fn list_for_record(&self, record_id: &str) -> DbResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events \
             WHERE record_id = ?1 ORDER BY created_at, rowid"
        ))
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    /// Most recent events across the library.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    /// Counts events of one kind.
    pub async fn count_kind(&self, kind: AuditKind) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_events WHERE kind = ?1")
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
