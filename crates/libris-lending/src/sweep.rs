//! # Overdue Sweep
//!
//! Walks open loans past due, flags the ones not yet flagged, and opens a
//! blacklist window for any borrower who holds one without an active window.
//!
//! ## One Loan, One Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  list_open_loans() → keep due_at < now                                 │
//! │                                                                         │
//! │  for each loan:                                                         │
//! │    BEGIN                                                                │
//! │      touch_open_in   (write lock first; 0 rows → returned → skipped)   │
//! │      flag_overdue_in (CAS: not yet flagged) + OverdueFlagged audit      │
//! │      decide_blacklist(student, record)                                  │
//! │        ├── Apply         → set_blacklist + AutoBlacklist audit         │
//! │        └── AlreadyActive → window untouched                            │
//! │    COMMIT                                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every pass re-evaluates every overdue open loan, so a window that lapses
//! or is lifted while the book is still out is opened again on the next
//! pass. Two passes in a row leave the same state: the second finds every
//! loan flagged and every borrower inside an active window.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use libris_core::policy::OverdueBook;
use libris_core::{AuditKind, BlacklistDecision, NewAuditEntry};
use libris_db::{AuditRepository, BorrowRepository, OpenLoan, StudentRepository};

use crate::engine::{expire_lapsed_in, LendingEngine};
use crate::error::{LendingError, LendingResult};

// =============================================================================
// Sweep Report
// =============================================================================

/// Counts from one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Open loans past due when the pass started.
    pub scanned: usize,
    /// Loans this pass flagged overdue for the first time.
    pub flagged: usize,
    /// Loans that opened a blacklist window.
    pub blacklisted: usize,
    /// Newly flagged loans whose borrower already had an active window.
    pub absorbed: usize,
    /// Loans returned before this pass got to them.
    pub skipped: usize,
    /// Loans whose transaction failed; the next pass picks them up.
    pub failed: usize,
}

impl SweepReport {
    /// Returns true if the pass changed nothing.
    pub fn is_quiet(&self) -> bool {
        self.flagged == 0 && self.blacklisted == 0
    }
}

enum LoanOutcome {
    /// Returned before the transaction started.
    Skipped,
    /// Already flagged, borrower inside an active window.
    Unchanged,
    Flagged,
    Blacklisted { newly_flagged: bool },
    Absorbed,
}

impl LendingEngine {
    /// Runs one overdue sweep pass at the engine's current time.
    pub async fn run_sweep(&self) -> LendingResult<SweepReport> {
        let now = self.now();
        let loans = self
            .bounded("sweep_scan", async { Ok(self.db.borrows().list_open_loans().await?) })
            .await?;

        let due: Vec<OpenLoan> = loans
            .into_iter()
            .filter(|loan| loan.due_at < now)
            .collect();

        let mut report = SweepReport {
            scanned: due.len(),
            ..Default::default()
        };

        for loan in &due {
            match self.bounded("sweep_loan", self.sweep_loan(loan)).await {
                Ok(LoanOutcome::Skipped) => report.skipped += 1,
                Ok(LoanOutcome::Unchanged) => {}
                Ok(LoanOutcome::Flagged) => report.flagged += 1,
                Ok(LoanOutcome::Blacklisted { newly_flagged }) => {
                    report.flagged += usize::from(newly_flagged);
                    report.blacklisted += 1;
                }
                Ok(LoanOutcome::Absorbed) => {
                    report.flagged += 1;
                    report.absorbed += 1;
                }
                Err(e) => {
                    warn!(record_id = %loan.record_id, error = %e, "Sweep failed for loan");
                    report.failed += 1;
                }
            }
        }

        if report.is_quiet() {
            debug!(?report, "Sweep pass complete");
        } else {
            info!(?report, "Sweep pass complete");
        }

        Ok(report)
    }

    async fn sweep_loan(&self, loan: &OpenLoan) -> LendingResult<LoanOutcome> {
        let now = self.now();
        let mut tx = self.db.begin().await?;

        // Rechecks status under the write lock; a return that won the race
        // leaves nothing to do.
        if !BorrowRepository::touch_open_in(&mut tx, &loan.record_id).await? {
            return Ok(LoanOutcome::Skipped);
        }

        let record = BorrowRepository::get_in(&mut tx, &loan.record_id)
            .await?
            .ok_or_else(|| LendingError::RecordNotFound {
                record_id: loan.record_id.clone(),
            })?;

        let newly_flagged = BorrowRepository::flag_overdue_in(&mut tx, &record.id, now).await?;
        if newly_flagged {
            AuditRepository::append_in(
                &mut tx,
                NewAuditEntry::new(
                    AuditKind::OverdueFlagged,
                    &record.student_id,
                    format!(
                        "\"{}\" (copy {}) overdue since {}",
                        loan.title,
                        loan.serial,
                        record.due_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                )
                .copy(&record.copy_id)
                .record(&record.id),
                now,
            )
            .await?;
        }

        let mut student = StudentRepository::get_in(&mut tx, &record.student_id)
            .await?
            .ok_or_else(|| LendingError::StudentUnknown {
                student_id: record.student_id.clone(),
            })?;
        expire_lapsed_in(&mut tx, &mut student, now).await?;

        let book = OverdueBook {
            title: &loan.title,
            serial: &loan.serial,
        };

        let outcome = match self.policy.decide_blacklist(&student, &record, book, now) {
            BlacklistDecision::Apply { until, reason } => {
                StudentRepository::set_blacklist(&mut tx, &student.id, until, &reason, now).await?;

                AuditRepository::append_in(
                    &mut tx,
                    NewAuditEntry::new(AuditKind::AutoBlacklist, &student.id, reason.clone())
                        .copy(&record.copy_id)
                        .record(&record.id)
                        .snapshot(&serde_json::json!({ "until": until, "reason": reason })),
                    now,
                )
                .await?;

                info!(student_id = %student.id, record_id = %record.id, until = %until, "Student blacklisted");
                LoanOutcome::Blacklisted { newly_flagged }
            }
            BlacklistDecision::AlreadyActive { until } if newly_flagged => {
                debug!(student_id = %student.id, until = %until, "Overdue absorbed by active blacklist");
                LoanOutcome::Absorbed
            }
            BlacklistDecision::AlreadyActive { .. } => LoanOutcome::Unchanged,
            BlacklistDecision::NotApplicable if newly_flagged => LoanOutcome::Flagged,
            BlacklistDecision::NotApplicable => LoanOutcome::Unchanged,
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

// =============================================================================
// Periodic Runner
// =============================================================================

/// Runs [`LendingEngine::run_sweep`] on a fixed interval until shut down.
pub struct SweepRunner {
    engine: Arc<LendingEngine>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a [`SweepRunner`].
#[derive(Clone)]
pub struct SweepRunnerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweepRunnerHandle {
    /// Triggers graceful shutdown. The pass in flight, if any, finishes first.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl SweepRunner {
    /// Creates a runner and its handle.
    pub fn new(engine: Arc<LendingEngine>, interval: Duration) -> (Self, SweepRunnerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let runner = SweepRunner {
            engine,
            interval,
            shutdown_rx,
        };

        (runner, SweepRunnerHandle { shutdown_tx })
    }

    /// Runs the sweep loop. The first pass starts immediately.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(interval = ?self.interval, "Sweep runner starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.engine.run_sweep().await {
                        error!(error = %e, "Sweep pass failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sweep runner shutting down");
                    break;
                }
            }
        }

        info!("Sweep runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::error::ErrorKind;
    use chrono::Duration as ChronoDuration;
    use libris_core::BlacklistState;
    use libris_db::{Database, DbConfig};

    #[tokio::test]
    async fn test_overdue_scenario_with_admin_lift() {
        let h = harness().await;
        let title = h.title("The Hobbit").await;
        let c1 = h.copy(&title, "HOB-001").await;
        let s1 = h.student("2024-0200").await;

        let record = h
            .engine
            .issue_for(&h.token(&s1), &c1.id, 1, "days")
            .await
            .unwrap();

        h.clock.advance(ChronoDuration::days(2));
        let sweep_at = h.engine.now();
        let report = h.engine.run_sweep().await.unwrap();
        assert_eq!(report.flagged, 1);
        assert_eq!(report.blacklisted, 1);

        let s1_now = h.engine.student(&s1.id).await.unwrap();
        match &s1_now.blacklist {
            BlacklistState::Blacklisted { until, reason } => {
                assert_eq!(*until, sweep_at + ChronoDuration::days(14));
                assert!(reason.contains("HOB-001"));
                assert!(reason.contains(&record.id));
            }
            other => panic!("expected blacklist, got {other:?}"),
        }

        let lifted = h.engine.unblacklist(&s1.id, "paid fine").await.unwrap();
        assert_eq!(lifted.blacklist, BlacklistState::Clear);

        // A subsequent issue for S1 succeeds.
        let c2 = h.copy(&title, "HOB-002").await;
        h.engine.issue(&h.token(&s1), &c2.id, None).await.unwrap();

        // C1 is still out and overdue, so the next pass opens a new window.
        h.clock.advance(ChronoDuration::hours(1));
        let again = h.engine.run_sweep().await.unwrap();
        assert_eq!(again.flagged, 0);
        assert_eq!(again.blacklisted, 1);
        assert_eq!(
            h.engine.student(&s1.id).await.unwrap().blacklist.until(),
            Some(h.engine.now() + ChronoDuration::days(14))
        );

        // Once the book is back and the window lifted, sweeps leave S1 alone.
        h.engine.return_book(&record.id).await.unwrap();
        h.engine.unblacklist(&s1.id, "book returned").await.unwrap();
        let after_return = h.engine.run_sweep().await.unwrap();
        assert!(after_return.is_quiet());
        assert_eq!(h.engine.student(&s1.id).await.unwrap().blacklist, BlacklistState::Clear);
    }

    #[tokio::test]
    async fn test_lapsed_window_reopens_while_book_is_out() {
        let h = harness().await;
        let title = h.title("Walden").await;
        let a = h.copy(&title, "WALD-001").await;
        let b = h.copy(&title, "WALD-002").await;
        let s = h.student("2024-0203").await;

        h.engine.issue_for(&h.token(&s), &a.id, 1, "days").await.unwrap();
        h.clock.advance(ChronoDuration::days(2));
        assert_eq!(h.engine.run_sweep().await.unwrap().blacklisted, 1);

        // The 14-day window lapses; the book is 16 days overdue.
        h.clock.advance(ChronoDuration::days(15));
        let report = h.engine.run_sweep().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.flagged, 0);
        assert_eq!(report.blacklisted, 1);

        let student = h.engine.student(&s.id).await.unwrap();
        assert_eq!(
            student.blacklist.until(),
            Some(h.engine.now() + ChronoDuration::days(14))
        );
        let audit = h.engine.db().audit();
        assert_eq!(audit.count_kind(AuditKind::BlacklistExpired).await.unwrap(), 1);
        assert_eq!(audit.count_kind(AuditKind::AutoBlacklist).await.unwrap(), 2);
        assert_eq!(audit.count_kind(AuditKind::OverdueFlagged).await.unwrap(), 1);

        let refused = h.engine.issue(&h.token(&s), &b.id, None).await.unwrap_err();
        assert_eq!(refused.kind(), ErrorKind::PolicyViolation);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let h = harness().await;
        let title = h.title("Dune").await;
        let a = h.copy(&title, "DUNE-001").await;
        let b = h.copy(&title, "DUNE-002").await;
        let s = h.student("2024-0201").await;

        h.engine.issue(&h.token(&s), &a.id, None).await.unwrap();
        h.engine.issue(&h.token(&s), &b.id, None).await.unwrap();
        h.clock.advance(ChronoDuration::days(3));

        let first = h.engine.run_sweep().await.unwrap();
        assert_eq!(first.flagged, 2);
        assert_eq!(first.blacklisted, 1);
        assert_eq!(first.absorbed, 1);

        let student_after_first = h.engine.db().students().get_by_id(&s.id).await.unwrap();
        let audit_after_first = h.engine.db().audit().recent(100).await.unwrap().len();

        let second = h.engine.run_sweep().await.unwrap();
        assert!(second.is_quiet());
        assert_eq!(second.scanned, 2);
        assert_eq!(second.failed, 0);

        assert_eq!(
            h.engine.db().students().get_by_id(&s.id).await.unwrap(),
            student_after_first
        );
        assert_eq!(h.engine.db().audit().recent(100).await.unwrap().len(), audit_after_first);
    }

    #[tokio::test]
    async fn test_second_overdue_does_not_extend_window() {
        let h = harness().await;
        let title = h.title("Cosmos").await;
        let a = h.copy(&title, "COSMOS-001").await;
        let b = h.copy(&title, "COSMOS-002").await;
        let s = h.student("2024-0202").await;

        h.engine.issue_for(&h.token(&s), &a.id, 1, "days").await.unwrap();
        h.engine.issue_for(&h.token(&s), &b.id, 3, "days").await.unwrap();

        // First loan overdue: window opens at t0 + 2d for 14 days.
        h.clock.advance(ChronoDuration::days(2));
        let first = h.engine.run_sweep().await.unwrap();
        assert_eq!(first.blacklisted, 1);
        let until = h.engine.student(&s.id).await.unwrap().blacklist.until().unwrap();
        assert_eq!(until, t0() + ChronoDuration::days(16));

        // Second loan overdue while the window is active: absorbed.
        h.clock.advance(ChronoDuration::days(2));
        let second = h.engine.run_sweep().await.unwrap();
        assert_eq!(second.flagged, 1);
        assert_eq!(second.absorbed, 1);
        assert_eq!(second.blacklisted, 0);
        assert_eq!(
            h.engine.student(&s.id).await.unwrap().blacklist.until().unwrap(),
            until
        );
    }

    #[tokio::test]
    async fn test_returned_before_sweep_is_not_blacklisted() {
        let h = harness().await;
        let title = h.title("Elements").await;
        let c = h.copy(&title, "EUCL-001").await;
        let s = h.student("2024-0204").await;

        let record = h.engine.issue(&h.token(&s), &c.id, None).await.unwrap();
        h.clock.advance(ChronoDuration::days(2));
        h.engine.return_book(&record.id).await.unwrap();

        let report = h.engine.run_sweep().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(h.engine.student(&s.id).await.unwrap().blacklist, BlacklistState::Clear);
    }

    #[tokio::test]
    async fn test_runner_stops_on_shutdown() {
        let h = harness().await;
        let title = h.title("Atlas").await;
        let c = h.copy(&title, "ATLAS-001").await;
        let s = h.student("2024-0205").await;
        h.engine.issue(&h.token(&s), &c.id, None).await.unwrap();
        h.clock.advance(ChronoDuration::days(2));

        let engine = Arc::new(h.engine.clone());
        let (runner, handle) = SweepRunner::new(engine, Duration::from_millis(10));
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
        task.await.unwrap();

        assert!(h.engine.student(&s.id).await.unwrap().blacklist.until().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_return_racing_sweep_never_blacklists_after_return() {
        let path = std::env::temp_dir().join(format!("libris-sweep-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(4)).await.unwrap();
        let h = harness_on(db).await;

        let title = h.title("Leviathan").await;
        let c = h.copy(&title, "LEV-001").await;
        let s = h.student("2024-0206").await;
        let record = h.engine.issue(&h.token(&s), &c.id, None).await.unwrap();
        h.clock.advance(ChronoDuration::days(2));

        let (returned, report) = tokio::join!(h.engine.return_book(&record.id), h.engine.run_sweep());
        returned.unwrap();
        let report = report.unwrap();
        assert_eq!(report.failed, 0);

        // Either the sweep committed first and the window stands, or the
        // return did and the sweep found nothing to act on.
        let blacklist = h.engine.student(&s.id).await.unwrap().blacklist;
        if report.blacklisted == 1 {
            assert!(blacklist.until().is_some());
        } else {
            assert_eq!(blacklist, BlacklistState::Clear);
            assert_eq!(report.flagged, 0);
        }

        let after = h.engine.run_sweep().await.unwrap();
        assert_eq!(after, SweepReport::default());

        h.engine.db().close().await;
        let _ = std::fs::remove_file(&path);
    }
}
