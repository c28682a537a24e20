//! # Connection Pool
//!
//! Opens the library database and hands out repositories and transactions.
//!
//! ## Lock Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  libris.db (WAL)                                                        │
//! │                                                                         │
//! │  readers ──────────────► snapshot reads, never wait on the writer       │
//! │    queries, accrued fines, overdue listings                             │
//! │                                                                         │
//! │  writers ──► BEGIN ──► first UPDATE takes the write lock                │
//! │    issue C1 ───────────┐                                                │
//! │    issue C1 ───────────┴─► second one waits up to busy_timeout, then    │
//! │                            sees the copy already borrowed               │
//! │    return C7 ──────────► queued behind the same lock, commits after     │
//! │                                                                         │
//! │  busy_timeout elapsed ──► DbError::Busy (retryable)                     │
//! │  no free connection ────► DbError::PoolExhausted (retryable)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! In-memory databases live as long as their single connection, so the pool
//! keeps it open for the lifetime of the handle.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::audit::AuditRepository;
use crate::repository::borrow::BorrowRepository;
use crate::repository::catalog::CatalogRepository;
use crate::repository::student::StudentRepository;

const IN_MEMORY: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Where the library database lives and how the pool behaves.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/libris/libris.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,

    /// Pool ceiling. Default: 5
    pub max_connections: u32,

    /// Connections opened eagerly. Default: 1
    pub min_connections: u32,

    /// Wait for a pooled connection. Default: 5s
    pub acquire_timeout: Duration,

    /// Wait for the SQLite write lock before BUSY. Default: 5s
    pub busy_timeout: Duration,

    /// Idle connections above the minimum are closed after this. Default: 10m
    pub idle_timeout: Duration,

    /// Apply embedded migrations when the pool opens. Default: true
    pub migrate_on_open: bool,
}

impl DbConfig {
    /// File-backed configuration. The file is created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            migrate_on_open: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.migrate_on_open = run;
        self
    }

    /// Private throwaway database, one connection, gone when the pool drops.
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let db = Database::new(DbConfig::in_memory()).await?;
    /// ```
    pub fn in_memory() -> Self {
        DbConfig {
            path: PathBuf::from(IN_MEMORY),
            // A second connection would open a second, empty database.
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(60),
            migrate_on_open: true,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the library database.
///
/// Clones share one pool.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("libris.db")).await?;
/// let open = db.borrows().list_open_loans().await?;
/// let student = db.students().get_by_number("2024-001").await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless disabled, brings the schema up to date.
    ///
    /// Every connection runs with foreign keys on, NORMAL synchronous and the
    /// configured busy timeout. File databases use WAL.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.path.display(), "Opening library database");

        let connect_options = config.connect_options()?;
        debug!(busy_timeout = ?config.busy_timeout, "SQLite options ready");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout));

        if config.is_in_memory() {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Library database open");

        let db = Database { pool };
        if config.migrate_on_open {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Applies any embedded migrations not yet recorded.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a transaction.
    ///
    /// Dropping the returned transaction without committing rolls it back,
    /// so a cancelled caller never leaves partial writes behind.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Titles and copies.
    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn students(&self) -> StudentRepository {
        StudentRepository::new(self.pool.clone())
    }

    pub fn borrows(&self) -> BorrowRepository {
        BorrowRepository::new(self.pool.clone())
    }

    pub fn audit(&self) -> AuditRepository {
        AuditRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        info!("Closing library database");
        self.pool.close().await;
    }

    /// True if a trivial query round-trips.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(db.health_check().await);

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_builder_overrides_defaults() {
        let config = DbConfig::new("/tmp/libris-test.db")
            .max_connections(10)
            .min_connections(2)
            .busy_timeout(Duration::from_millis(250))
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.migrate_on_open);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let path = std::env::temp_dir().join(format!("libris-pool-{}.db", uuid::Uuid::new_v4()));

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        db.close().await;
        assert!(!db.health_check().await);

        let reopened = Database::new(DbConfig::new(&path)).await.unwrap();
        let (total, applied) = migrations::migration_status(reopened.pool()).await.unwrap();
        assert_eq!(total, applied);
        reopened.close().await;

        let _ = std::fs::remove_file(&path);
    }
}
