//! # Student Repository
//!
//! The borrower directory, including the stored blacklist attribute.
//!
//! The two blacklist columns are written only by the helpers at the bottom
//! of this file, all of which run on a caller-supplied transaction:
//!
//! ```text
//! set_blacklist            ← overdue sweep (AutoBlacklist)
//! clear_blacklist          ← admin Unblacklist
//! clear_expired_blacklist  ← lazy expiry on read (BlacklistExpired)
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use libris_core::{BlacklistState, Student};

#[derive(Debug, sqlx::FromRow)]
struct StudentRow {
    id: String,
    student_number: String,
    full_name: String,
    class_name: Option<String>,
    email: Option<String>,
    blacklisted_until: Option<DateTime<Utc>>,
    blacklist_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        Student {
            id: row.id,
            student_number: row.student_number,
            full_name: row.full_name,
            class_name: row.class_name,
            email: row.email,
            blacklist: BlacklistState::from_columns(row.blacklisted_until, row.blacklist_reason),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const STUDENT_COLUMNS: &str = "id, student_number, full_name, class_name, email, \
     blacklisted_until, blacklist_reason, created_at, updated_at";

/// Repository for student database operations.
#[derive(Debug, Clone)]
pub struct StudentRepository {
    pool: SqlitePool,
}

impl StudentRepository {
    /// Creates a new StudentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StudentRepository { pool }
    }

    /// Inserts a new student.
    ///
    /// ## Errors
    /// `UniqueViolation` on `students.student_number` for a duplicate number.
    pub async fn insert(&self, student: &Student) -> DbResult<()> {
        debug!(id = %student.id, student_number = %student.student_number, "Inserting student");

        sqlx::query(
            r#"
            INSERT INTO students (
                id, student_number, full_name, class_name, email,
                blacklisted_until, blacklist_reason,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&student.id)
        .bind(&student.student_number)
        .bind(&student.full_name)
        .bind(&student.class_name)
        .bind(&student.email)
        .bind(student.blacklist.until())
        .bind(match &student.blacklist {
            BlacklistState::Blacklisted { reason, .. } => Some(reason.as_str()),
            BlacklistState::Clear => None,
        })
        .bind(student.created_at)
        .bind(student.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => {
                DbError::duplicate(field, &student.student_number)
            }
            other => other,
        })?;

        Ok(())
    }

    /// Gets a student by ID, exactly as stored.
    ///
    /// The blacklist may hold an expired window; decisions go through
    /// [`Student::blacklist_at`].
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Student>> {
        let row: Option<StudentRow> =
            sqlx::query_as(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Student::from))
    }

    /// Gets a student by library card number.
    pub async fn get_by_number(&self, student_number: &str) -> DbResult<Option<Student>> {
        let row: Option<StudentRow> = sqlx::query_as(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE student_number = ?1"
        ))
        .bind(student_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Student::from))
    }

    /// Students with a stored blacklist window, active or not yet cleared.
    pub async fn list_blacklisted(&self) -> DbResult<Vec<Student>> {
        let rows: Vec<StudentRow> = sqlx::query_as(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students \
             WHERE blacklisted_until IS NOT NULL ORDER BY full_name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Student::from).collect())
    }

    /// Counts students (for diagnostics and the seed binary).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Transaction-scoped helpers
    // -------------------------------------------------------------------------

    /// Gets a student on the caller's transaction.
    pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Student>> {
        let row: Option<StudentRow> =
            sqlx::query_as(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(row.map(Student::from))
    }

    /// Opens a blacklist window.
    pub async fn set_blacklist(
        conn: &mut SqliteConnection,
        id: &str,
        until: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(id = %id, until = %until, "Blacklisting student");

        let result = sqlx::query(
            r#"
            UPDATE students
            SET blacklisted_until = ?2, blacklist_reason = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(until)
        .bind(reason)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Student", id));
        }

        Ok(())
    }

    /// Clears the blacklist unconditionally.
    ///
    /// ## Returns
    /// `false` if the student doesn't exist.
    pub async fn clear_blacklist(
        conn: &mut SqliteConnection,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(id = %id, "Clearing student blacklist");

        let result = sqlx::query(
            r#"
            UPDATE students
            SET blacklisted_until = NULL, blacklist_reason = NULL, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Clears a window that has expired, if it is still the one stored.
    ///
    /// `stored_until` is the value the caller read; a concurrent writer
    /// that replaced the window makes this a no-op.
    pub async fn clear_expired_blacklist(
        conn: &mut SqliteConnection,
        id: &str,
        stored_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE students
            SET blacklisted_until = NULL, blacklist_reason = NULL, updated_at = ?3
            WHERE id = ?1 AND blacklisted_until = ?2
            "#,
        )
        .bind(id)
        .bind(stored_until)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Generates a new student ID.
pub fn generate_student_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;

    fn student(number: &str, now: DateTime<Utc>) -> Student {
        Student {
            id: generate_student_id(),
            student_number: number.to_string(),
            full_name: "Ada Lovelace".to_string(),
            class_name: Some("9C".to_string()),
            email: None,
            blacklist: BlacklistState::Clear,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let s = student("2024-001", now);
        db.students().insert(&s).await.unwrap();

        let by_id = db.students().get_by_id(&s.id).await.unwrap().unwrap();
        let by_number = db.students().get_by_number("2024-001").await.unwrap().unwrap();
        assert_eq!(by_id.id, by_number.id);
        assert_eq!(by_id.blacklist, BlacklistState::Clear);
        assert_eq!(db.students().count().await.unwrap(), 1);

        let err = db.students().insert(&student("2024-001", now)).await.unwrap_err();
        assert!(err.is_unique_violation_on("students.student_number"));
    }

    #[tokio::test]
    async fn test_blacklist_set_and_clear() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let s = student("2024-002", now);
        db.students().insert(&s).await.unwrap();
        let until = now + Duration::days(14);

        let mut tx = db.begin().await.unwrap();
        StudentRepository::set_blacklist(&mut tx, &s.id, until, "Overdue: Dune", now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let loaded = db.students().get_by_id(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.blacklist.until(), Some(until));
        assert_eq!(db.students().list_blacklisted().await.unwrap().len(), 1);

        let mut tx = db.begin().await.unwrap();
        assert!(StudentRepository::clear_blacklist(&mut tx, &s.id, now).await.unwrap());
        assert!(!StudentRepository::clear_blacklist(&mut tx, "missing", now).await.unwrap());
        tx.commit().await.unwrap();

        let loaded = db.students().get_by_id(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.blacklist, BlacklistState::Clear);
    }

    #[tokio::test]
    async fn test_clear_expired_only_matches_stored_window() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let s = student("2024-003", now);
        db.students().insert(&s).await.unwrap();
        let until = now - Duration::hours(1);

        let mut tx = db.begin().await.unwrap();
        StudentRepository::set_blacklist(&mut tx, &s.id, until, "old", now - Duration::days(15))
            .await
            .unwrap();

        let other = until + Duration::seconds(1);
        assert!(!StudentRepository::clear_expired_blacklist(&mut tx, &s.id, other, now)
            .await
            .unwrap());
        assert!(StudentRepository::clear_expired_blacklist(&mut tx, &s.id, until, now)
            .await
            .unwrap());
        tx.commit().await.unwrap();

        let loaded = db.students().get_by_id(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.blacklist, BlacklistState::Clear);
    }
}
