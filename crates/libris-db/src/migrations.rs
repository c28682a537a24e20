//! # Schema Migrations
//!
//! The SQL under `migrations/sqlite/` is compiled into the binary, so a
//! deployed sweeper or desk process carries the schema it expects.
//!
//! ```text
//!  001_initial_schema.sql
//!    book_titles ─┐
//!    book_copies ─┴─► borrow_records ◄── students
//!                          │
//!                          └─► audit_events   (UPDATE/DELETE rejected by trigger)
//! ```
//!
//! Applied files are checksummed in `_sqlx_migrations`. Editing one after it
//! shipped makes every existing database refuse to open; add `002_...` instead.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies pending migrations. Safe to call on every start.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(embedded = MIGRATOR.migrations.len(), "Applying schema migrations");
    MIGRATOR.run(pool).await?;
    info!("Schema up to date");
    Ok(())
}

/// Returns `(embedded, applied)` migration counts.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;

    Ok((MIGRATOR.migrations.len(), applied.max(0) as usize))
}
