//! # Lending Engine
//!
//! The facade every inbound operation goes through.
//!
//! ## Transaction Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  tokio::time::timeout(operation_timeout)                                │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │  BEGIN                                                            │  │
//! │  │    1. compare-and-swap write (claim copy / close record / ...)    │  │
//! │  │       └── 0 rows → read to explain, ROLLBACK, typed error         │  │
//! │  │    2. reads under the write lock                                  │  │
//! │  │    3. remaining writes + audit rows                               │  │
//! │  │  COMMIT                                                           │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │  elapsed → LendingError::Timeout (Transient), transaction rolled back   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Starting with a write means SQLite hands out its write lock before any
//! row is read, so two transactions never act on the same stale snapshot.
//! Dropping a transaction without commit rolls it back, which is also what
//! happens when a caller abandons the future.
//!
//! Operations live next to their concern:
//! - [`crate::ledger`] - issue, return, fines
//! - [`crate::blacklist`] - lazy expiry, admin lift
//! - [`crate::sweep`] - overdue sweep and its runner
//! - [`crate::registry`] - catalog and directory registration, queries

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use libris_core::{AuditKind, LibraryPolicy, NewAuditEntry, Student};
use libris_db::{AuditRepository, Database, StudentRepository};

use crate::clock::{Clock, SystemClock};
use crate::config::LendingConfig;
use crate::error::{LendingError, LendingResult};

/// Deadline applied when none is configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Borrowing lifecycle engine.
///
/// Cheap to clone; clones share the pool and the clock.
#[derive(Clone)]
pub struct LendingEngine {
    pub(crate) db: Database,
    pub(crate) policy: LibraryPolicy,
    clock: Arc<dyn Clock>,
    operation_timeout: Duration,
}

impl LendingEngine {
    /// Creates an engine on the wall clock with the default deadline.
    pub fn new(db: Database, policy: LibraryPolicy) -> Self {
        LendingEngine {
            db,
            policy,
            clock: Arc::new(SystemClock),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Opens the configured database and builds an engine from `config`.
    pub async fn from_config(config: &LendingConfig) -> LendingResult<Self> {
        let policy = config.policy()?;
        let db = Database::new(config.db_config()).await?;

        info!(
            fine_rate = %policy.fine_rate_per_day,
            blacklist_window_days = policy.blacklist_window_days,
            "Lending engine ready"
        );

        Ok(LendingEngine::new(db, policy).with_operation_timeout(config.operation_timeout()))
    }

    /// Replaces the clock (tests use a `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn policy(&self) -> &LibraryPolicy {
        &self.policy
    }

    /// Current instant according to the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs `fut` under the operation deadline.
    pub(crate) async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = LendingResult<T>>,
    ) -> LendingResult<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(operation, timeout = ?self.operation_timeout, "Operation timed out");
                Err(LendingError::Timeout {
                    operation,
                    timeout: self.operation_timeout,
                })
            }
        }
    }
}

/// Clears a stored blacklist window that has lapsed by `now` and audits it.
///
/// The clear is a compare-and-swap on the stored `until`, so a window
/// replaced concurrently is left alone. `student` is updated to match the
/// stored row either way.
pub(crate) async fn expire_lapsed_in(
    conn: &mut SqliteConnection,
    student: &mut Student,
    now: DateTime<Utc>,
) -> LendingResult<()> {
    let Some(until) = student.blacklist.until() else {
        return Ok(());
    };
    if until > now {
        return Ok(());
    }

    if StudentRepository::clear_expired_blacklist(conn, &student.id, until, now).await? {
        AuditRepository::append_in(
            conn,
            NewAuditEntry::new(
                AuditKind::BlacklistExpired,
                &student.id,
                format!("Blacklist ended {}", until.format("%Y-%m-%d %H:%M UTC")),
            )
            .snapshot(&student.blacklist),
            now,
        )
        .await?;

        info!(student_id = %student.id, until = %until, "Blacklist expired");

        student.blacklist = libris_core::BlacklistState::Clear;
        student.updated_at = now;
        return Ok(());
    }

    // Lost the swap: the window was lifted or replaced after `student` was read.
    *student = StudentRepository::get_in(conn, &student.id)
        .await?
        .ok_or_else(|| LendingError::StudentUnknown {
            student_id: student.id.clone(),
        })?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for engine tests.

    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use libris_core::identity::IdentityClaim;
    use libris_core::{BookCopy, BookTitle, LoanPeriod, VerificationMethod, VerifiedStudentId};

    use crate::registry::{NewStudent, NewTitle};

    pub struct Harness {
        pub engine: LendingEngine,
        pub clock: Arc<ManualClock>,
    }

    /// 2024-01-31T00:00Z, the last day of a month before a leap February.
    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()
    }

    /// A fingerprint match for `student_id` at `at`.
    pub fn token_for(student_id: &str, at: DateTime<Utc>) -> VerifiedStudentId {
        let claim = IdentityClaim {
            student_id: student_id.to_string(),
            method: VerificationMethod::Fingerprint,
            sample: Vec::new(),
        };
        VerifiedStudentId::matched(&claim, at)
    }

    pub async fn harness() -> Harness {
        let db = Database::new(libris_db::DbConfig::in_memory()).await.unwrap();
        harness_on(db).await
    }

    pub async fn harness_on(db: Database) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = LendingEngine::new(db, LibraryPolicy::default()).with_clock(clock.clone());
        Harness { engine, clock }
    }

    impl Harness {
        pub async fn title(&self, name: &str) -> BookTitle {
            self.engine
                .add_title(NewTitle {
                    title: name.to_string(),
                    author: "Anon".to_string(),
                    category: "Fiction".to_string(),
                    default_period: Some(LoanPeriod::parse(1, "days").unwrap()),
                })
                .await
                .unwrap()
        }

        pub async fn copy(&self, title: &BookTitle, serial: &str) -> BookCopy {
            self.engine.add_copy(&title.id, serial).await.unwrap()
        }

        pub async fn student(&self, number: &str) -> Student {
            self.engine
                .register_student(NewStudent {
                    student_number: number.to_string(),
                    full_name: format!("Student {number}"),
                    class_name: Some("7A".to_string()),
                    email: None,
                })
                .await
                .unwrap()
        }

        pub fn token(&self, student: &Student) -> VerifiedStudentId {
            token_for(&student.id, self.engine.now())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_bounded_maps_elapsed_to_transient() {
        let h = harness().await;
        let engine = h.engine.with_operation_timeout(Duration::from_millis(10));

        let result: LendingResult<()> = engine
            .bounded("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_engine_reads_manual_clock() {
        let h = harness().await;
        assert_eq!(h.engine.now(), t0());
        h.clock.advance(chrono::Duration::hours(3));
        assert_eq!(h.engine.now(), t0() + chrono::Duration::hours(3));
    }
}
