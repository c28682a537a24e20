//! # Catalog Repository
//!
//! Book titles and their physical copies.
//!
//! ## Copy Status Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   available ── claim_copy (CAS: WHERE status = 'available') ──► borrowed│
//! │       ▲                                                          │      │
//! │       └────────── release_copy (WHERE status = 'borrowed') ◄─────┘      │
//! │                                                                         │
//! │  Both run on the caller's transaction, next to the borrow-record write │
//! │  they belong to, so status and open record commit together.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use libris_core::{BookCopy, BookTitle, CopyStatus, LoanPeriod, PeriodUnit};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct TitleRow {
    id: String,
    title: String,
    author: String,
    category: String,
    period_value: i64,
    period_unit: PeriodUnit,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TitleRow> for BookTitle {
    type Error = DbError;

    fn try_from(row: TitleRow) -> DbResult<Self> {
        let default_period = LoanPeriod::new(row.period_value, row.period_unit)
            .map_err(|e| DbError::corrupt("BookTitle", &row.id, e))?;

        Ok(BookTitle {
            id: row.id,
            title: row.title,
            author: row.author,
            category: row.category,
            default_period,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CopyRow {
    id: String,
    title_id: String,
    serial: String,
    status: CopyStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CopyRow> for BookCopy {
    fn from(row: CopyRow) -> Self {
        BookCopy {
            id: row.id,
            title_id: row.title_id,
            serial: row.serial,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const TITLE_COLUMNS: &str =
    "id, title, author, category, period_value, period_unit, created_at, updated_at";
const COPY_COLUMNS: &str = "id, title_id, serial, status, created_at, updated_at";

// =============================================================================
// Repository
// =============================================================================

/// Repository for catalog operations.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Titles
    // -------------------------------------------------------------------------

    /// Inserts a new title.
    pub async fn insert_title(&self, title: &BookTitle) -> DbResult<()> {
        debug!(id = %title.id, title = %title.title, "Inserting book title");

        sqlx::query(
            r#"
            INSERT INTO book_titles (
                id, title, author, category,
                period_value, period_unit,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&title.id)
        .bind(&title.title)
        .bind(&title.author)
        .bind(&title.category)
        .bind(title.default_period.value())
        .bind(title.default_period.unit())
        .bind(title.created_at)
        .bind(title.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a title by ID.
    pub async fn get_title(&self, id: &str) -> DbResult<Option<BookTitle>> {
        let row: Option<TitleRow> =
            sqlx::query_as(&format!("SELECT {TITLE_COLUMNS} FROM book_titles WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(BookTitle::try_from).transpose()
    }

    /// Lists titles ordered by title text.
    pub async fn list_titles(&self) -> DbResult<Vec<BookTitle>> {
        let rows: Vec<TitleRow> = sqlx::query_as(&format!(
            "SELECT {TITLE_COLUMNS} FROM book_titles ORDER BY title, author"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BookTitle::try_from).collect()
    }

    /// Changes a title's default loan period.
    ///
    /// Allowed whether or not copies exist.
    pub async fn update_due_period(
        &self,
        id: &str,
        period: LoanPeriod,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(id = %id, period = %period, "Updating default loan period");

        let result = sqlx::query(
            r#"
            UPDATE book_titles
            SET period_value = ?2, period_unit = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(period.value())
        .bind(period.unit())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("BookTitle", id));
        }

        Ok(())
    }

    /// Edits title, author and category, but only while the title has no copies.
    ///
    /// ## Returns
    /// `true` if the row was updated, `false` if it was missing or locked.
    /// The caller tells those apart with [`Self::get_title`] and
    /// [`Self::count_copies`].
    pub async fn update_details(
        &self,
        id: &str,
        title: &str,
        author: &str,
        category: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE book_titles
            SET title = ?2, author = ?3, category = ?4, updated_at = ?5
            WHERE id = ?1
              AND NOT EXISTS (SELECT 1 FROM book_copies WHERE title_id = ?1)
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(author)
        .bind(category)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Gets a title on the caller's transaction.
    pub async fn get_title_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<BookTitle>> {
        let row: Option<TitleRow> =
            sqlx::query_as(&format!("SELECT {TITLE_COLUMNS} FROM book_titles WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        row.map(BookTitle::try_from).transpose()
    }

    // -------------------------------------------------------------------------
    // Copies
    // -------------------------------------------------------------------------

    /// Inserts a new copy.
    ///
    /// ## Errors
    /// - `UniqueViolation` on `book_copies.serial` for a duplicate serial
    /// - `ForeignKeyViolation` if the title doesn't exist
    pub async fn insert_copy(&self, copy: &BookCopy) -> DbResult<()> {
        debug!(id = %copy.id, serial = %copy.serial, title_id = %copy.title_id, "Inserting book copy");

        sqlx::query(
            r#"
            INSERT INTO book_copies (id, title_id, serial, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&copy.id)
        .bind(&copy.title_id)
        .bind(&copy.serial)
        .bind(copy.status)
        .bind(copy.created_at)
        .bind(copy.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &copy.serial),
            other => other,
        })?;

        Ok(())
    }

    /// Gets a copy by ID.
    pub async fn get_copy(&self, id: &str) -> DbResult<Option<BookCopy>> {
        let row: Option<CopyRow> =
            sqlx::query_as(&format!("SELECT {COPY_COLUMNS} FROM book_copies WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(BookCopy::from))
    }

    /// Gets a copy by its physical serial.
    pub async fn get_copy_by_serial(&self, serial: &str) -> DbResult<Option<BookCopy>> {
        let row: Option<CopyRow> = sqlx::query_as(&format!(
            "SELECT {COPY_COLUMNS} FROM book_copies WHERE serial = ?1"
        ))
        .bind(serial)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BookCopy::from))
    }

    /// Lists the copies of a title, by serial.
    pub async fn list_copies(&self, title_id: &str) -> DbResult<Vec<BookCopy>> {
        let rows: Vec<CopyRow> = sqlx::query_as(&format!(
            "SELECT {COPY_COLUMNS} FROM book_copies WHERE title_id = ?1 ORDER BY serial"
        ))
        .bind(title_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BookCopy::from).collect())
    }

    /// Counts copies of a title.
    pub async fn count_copies(&self, title_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM book_copies WHERE title_id = ?1")
            .bind(title_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts copies currently on the shelf for a title.
    pub async fn count_available(&self, title_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM book_copies WHERE title_id = ?1 AND status = 'available'",
        )
        .bind(title_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Gets a copy on the caller's transaction.
    pub async fn get_copy_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<BookCopy>> {
        let row: Option<CopyRow> =
            sqlx::query_as(&format!("SELECT {COPY_COLUMNS} FROM book_copies WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(row.map(BookCopy::from))
    }

    /// Compare-and-swap `available → borrowed`.
    ///
    /// Returns `false` if the copy is missing or already borrowed. This is
    /// the first write of an issue transaction, so it also takes SQLite's
    /// write lock before anything is read.
    pub async fn claim_copy(
        conn: &mut SqliteConnection,
        copy_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE book_copies
            SET status = 'borrowed', updated_at = ?2
            WHERE id = ?1 AND status = 'available'
            "#,
        )
        .bind(copy_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Compare-and-swap `borrowed → available`.
    pub async fn release_copy(
        conn: &mut SqliteConnection,
        copy_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE book_copies
            SET status = 'available', updated_at = ?2
            WHERE id = ?1 AND status = 'borrowed'
            "#,
        )
        .bind(copy_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Generates a new title ID.
pub fn generate_title_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new copy ID.
pub fn generate_copy_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn title(now: DateTime<Utc>) -> BookTitle {
        BookTitle {
            id: generate_title_id(),
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            category: "Fiction".to_string(),
            default_period: LoanPeriod::parse(2, "weeks").unwrap(),
            created_at: now,
            updated_at: now,
        }
    }

    fn copy(title_id: &str, serial: &str, now: DateTime<Utc>) -> BookCopy {
        BookCopy {
            id: generate_copy_id(),
            title_id: title_id.to_string(),
            serial: serial.to_string(),
            status: CopyStatus::Available,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_title_round_trip_keeps_period() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let t = title(now);
        db.catalog().insert_title(&t).await.unwrap();

        let loaded = db.catalog().get_title(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded.default_period, t.default_period);
        assert_eq!(loaded.author, "Frank Herbert");
        assert!(db.catalog().get_title("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_serial_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let t = title(now);
        db.catalog().insert_title(&t).await.unwrap();
        db.catalog().insert_copy(&copy(&t.id, "DUNE-1", now)).await.unwrap();

        let err = db
            .catalog()
            .insert_copy(&copy(&t.id, "DUNE-1", now))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("book_copies.serial"));
    }

    #[tokio::test]
    async fn test_details_lock_once_copies_exist() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let t = title(now);
        db.catalog().insert_title(&t).await.unwrap();

        assert!(db
            .catalog()
            .update_details(&t.id, "Dune (1965)", "Frank Herbert", "Fiction", now)
            .await
            .unwrap());

        db.catalog().insert_copy(&copy(&t.id, "DUNE-1", now)).await.unwrap();
        assert!(!db
            .catalog()
            .update_details(&t.id, "Dune Messiah", "Frank Herbert", "Fiction", now)
            .await
            .unwrap());

        // Period edits stay allowed.
        let period = LoanPeriod::parse(1, "months").unwrap();
        db.catalog().update_due_period(&t.id, period, now).await.unwrap();
        let loaded = db.catalog().get_title(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Dune (1965)");
        assert_eq!(loaded.default_period, period);
    }

    #[tokio::test]
    async fn test_claim_and_release_are_compare_and_swap() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let t = title(now);
        db.catalog().insert_title(&t).await.unwrap();
        let c = copy(&t.id, "DUNE-1", now);
        db.catalog().insert_copy(&c).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert!(CatalogRepository::claim_copy(&mut tx, &c.id, now).await.unwrap());
        assert!(!CatalogRepository::claim_copy(&mut tx, &c.id, now).await.unwrap());
        assert!(!CatalogRepository::claim_copy(&mut tx, "missing", now).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(db.catalog().count_available(&t.id).await.unwrap(), 0);

        let mut tx = db.begin().await.unwrap();
        assert!(CatalogRepository::release_copy(&mut tx, &c.id, now).await.unwrap());
        assert!(!CatalogRepository::release_copy(&mut tx, &c.id, now).await.unwrap());
        tx.commit().await.unwrap();

        let loaded = db.catalog().get_copy_by_serial("DUNE-1").await.unwrap().unwrap();
        assert!(loaded.is_available());
    }

    #[tokio::test]
    async fn test_rolled_back_claim_leaves_copy_available() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let t = title(now);
        db.catalog().insert_title(&t).await.unwrap();
        let c = copy(&t.id, "DUNE-2", now);
        db.catalog().insert_copy(&c).await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            assert!(CatalogRepository::claim_copy(&mut tx, &c.id, now).await.unwrap());
            // dropped without commit
        }

        let loaded = db.catalog().get_copy(&c.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CopyStatus::Available);
    }
}
