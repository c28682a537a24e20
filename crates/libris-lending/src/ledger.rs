//! # Lending Ledger Operations
//!
//! Issue and return, the two operations that move a copy between the shelf
//! and a borrower, plus fine lookups and settlement.
//!
//! ## Issue
//! ```text
//!  BEGIN
//!   ├── claim_copy        UPDATE .. SET status='borrowed' WHERE status='available'
//!   │     └── 0 rows ──► CopyNotFound | CopyUnavailable
//!   ├── load student ───► StudentUnknown
//!   ├── lapsed window? ─► clear + BlacklistExpired
//!   ├── active window? ─► StudentBlacklisted (rollback releases the claim)
//!   ├── due = borrowed_at + period (title default if none given)
//!   ├── insert record     partial unique index backs up the claim
//!   └── BookIssued audit
//!  COMMIT
//! ```
//!
//! ## Return
//! ```text
//!  BEGIN
//!   ├── close_in          UPDATE .. SET status='returned' WHERE status='borrowed'
//!   │     └── 0 rows ──► RecordNotFound | AlreadyReturned
//!   ├── fine = fine(due_at, now, rate)
//!   ├── release_copy
//!   └── BookReturned audit
//!  COMMIT
//! ```

use serde::Serialize;
use tracing::{debug, info, warn};

use libris_core::identity::IdentityClaim;
use libris_core::{
    AuditKind, BorrowRecord, BorrowStatus, LoanPeriod, Money, NewAuditEntry, VerifiedStudentId,
};
use libris_db::repository::borrow::generate_record_id;
use libris_db::{AuditRepository, BorrowRepository, CatalogRepository, StudentRepository};

use crate::engine::{expire_lapsed_in, LendingEngine};
use crate::error::{LendingError, LendingResult};
use crate::identity::IdentityVerifier;

/// What a return hands back to the desk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnReceipt {
    /// The closed record, fine included.
    pub record: BorrowRecord,
    pub fine: Money,
}

impl LendingEngine {
    // =========================================================================
    // Issue
    // =========================================================================

    /// Lends `copy_id` to the verified borrower.
    ///
    /// `period` falls back to the title's default loan period.
    ///
    /// ## Errors
    /// - `CopyNotFound` / `StudentUnknown` (NotFound)
    /// - `CopyUnavailable` (Conflict), including a lost race for the copy
    /// - `StudentBlacklisted` (PolicyViolation) with until and reason
    pub async fn issue(
        &self,
        borrower: &VerifiedStudentId,
        copy_id: &str,
        period: Option<LoanPeriod>,
    ) -> LendingResult<BorrowRecord> {
        self.bounded("issue", self.issue_inner(borrower, copy_id, period))
            .await
    }

    /// Issue with the period given as a raw value and unit name.
    ///
    /// Unknown units and non-positive values fail with `Invalid` before any
    /// storage work.
    pub async fn issue_for(
        &self,
        borrower: &VerifiedStudentId,
        copy_id: &str,
        period_value: i64,
        period_unit: &str,
    ) -> LendingResult<BorrowRecord> {
        let period = LoanPeriod::parse(period_value, period_unit)?;
        self.issue(borrower, copy_id, Some(period)).await
    }

    /// Verifies the claim, audits the outcome, then issues.
    ///
    /// A failed verification is audited as `VerificationFailed` and reported
    /// as a `PolicyViolation`; nothing is issued.
    pub async fn issue_with_verification<V: IdentityVerifier>(
        &self,
        verifier: &V,
        claim: &IdentityClaim,
        copy_id: &str,
        period: Option<LoanPeriod>,
    ) -> LendingResult<BorrowRecord> {
        let outcome = self
            .bounded("verify", async { Ok(verifier.verify(claim).await) })
            .await?;

        match outcome {
            Ok(token) => {
                self.db
                    .audit()
                    .append(
                        NewAuditEntry::new(
                            AuditKind::IdentityVerified,
                            token.student_id(),
                            format!("{} match", token.method()),
                        )
                        .copy(copy_id)
                        .snapshot(&token),
                        self.now(),
                    )
                    .await?;

                self.issue(&token, copy_id, period).await
            }
            Err(failed) => {
                warn!(student_id = %claim.student_id, reason = %failed.reason, "Identity verification failed");

                self.db
                    .audit()
                    .append(
                        NewAuditEntry::new(
                            AuditKind::VerificationFailed,
                            &claim.student_id,
                            format!("{}: {}", claim.method, failed.reason),
                        )
                        .copy(copy_id),
                        self.now(),
                    )
                    .await?;

                Err(LendingError::VerificationFailed {
                    student_id: claim.student_id.clone(),
                    reason: failed.reason,
                })
            }
        }
    }

    async fn issue_inner(
        &self,
        borrower: &VerifiedStudentId,
        copy_id: &str,
        period: Option<LoanPeriod>,
    ) -> LendingResult<BorrowRecord> {
        let now = self.now();
        let student_id = borrower.student_id();
        let mut tx = self.db.begin().await?;

        // The claim decides any race for this copy.
        if !CatalogRepository::claim_copy(&mut tx, copy_id, now).await? {
            let err = match CatalogRepository::get_copy_in(&mut tx, copy_id).await? {
                None => LendingError::CopyNotFound {
                    copy_id: copy_id.to_string(),
                },
                Some(_) => LendingError::CopyUnavailable {
                    copy_id: copy_id.to_string(),
                },
            };
            debug!(copy_id = %copy_id, error = %err, "Copy claim refused");
            return Err(err);
        }

        let mut student = StudentRepository::get_in(&mut tx, student_id)
            .await?
            .ok_or_else(|| LendingError::StudentUnknown {
                student_id: student_id.to_string(),
            })?;

        expire_lapsed_in(&mut tx, &mut student, now).await?;
        student.ensure_may_borrow(now)?;

        let copy = CatalogRepository::get_copy_in(&mut tx, copy_id)
            .await?
            .ok_or_else(|| LendingError::CopyNotFound {
                copy_id: copy_id.to_string(),
            })?;
        let title = CatalogRepository::get_title_in(&mut tx, &copy.title_id)
            .await?
            .ok_or_else(|| LendingError::TitleNotFound {
                title_id: copy.title_id.clone(),
            })?;

        let period = period.unwrap_or(title.default_period);
        let due_at = period.due_at(now)?;

        let record = BorrowRecord {
            id: generate_record_id(),
            copy_id: copy.id.clone(),
            student_id: student.id.clone(),
            borrowed_at: now,
            due_at,
            returned_at: None,
            status: BorrowStatus::Borrowed,
            fine_cents: 0,
            fine_paid_at: None,
            overdue_since: None,
            verified_by: borrower.method(),
        };

        BorrowRepository::insert_in(&mut tx, &record)
            .await
            .map_err(|e| {
                if e.is_unique_violation_on("borrow_records.copy_id") {
                    LendingError::CopyUnavailable {
                        copy_id: copy_id.to_string(),
                    }
                } else {
                    e.into()
                }
            })?;

        AuditRepository::append_in(
            &mut tx,
            NewAuditEntry::new(
                AuditKind::BookIssued,
                &student.id,
                format!(
                    "Issued \"{}\" (copy {}) for {}, due {}",
                    title.title,
                    copy.serial,
                    period,
                    due_at.format("%Y-%m-%d %H:%M UTC")
                ),
            )
            .copy(&copy.id)
            .record(&record.id)
            .snapshot(&record),
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            record_id = %record.id,
            copy_id = %copy.id,
            student_id = %student.id,
            due_at = %due_at,
            "Book issued"
        );

        Ok(record)
    }

    // =========================================================================
    // Return
    // =========================================================================

    /// Closes an open record, fixes its fine and puts the copy back.
    ///
    /// Repeating a return fails with `AlreadyReturned`; it is never a no-op.
    pub async fn return_book(&self, record_id: &str) -> LendingResult<ReturnReceipt> {
        self.bounded("return", self.return_inner(record_id)).await
    }

    async fn return_inner(&self, record_id: &str) -> LendingResult<ReturnReceipt> {
        let now = self.now();
        let mut tx = self.db.begin().await?;

        let Some(mut record) = BorrowRepository::close_in(&mut tx, record_id, now).await? else {
            let existing = BorrowRepository::get_in(&mut tx, record_id)
                .await?
                .ok_or_else(|| LendingError::RecordNotFound {
                    record_id: record_id.to_string(),
                })?;
            existing.ensure_open()?;
            return Err(LendingError::Storage(format!(
                "open borrow record {record_id} could not be closed"
            )));
        };

        let fine = self.policy.fine_at_return(record.due_at, now);
        BorrowRepository::set_fine_in(&mut tx, &record.id, fine.cents()).await?;
        record.fine_cents = fine.cents();

        if !CatalogRepository::release_copy(&mut tx, &record.copy_id, now).await? {
            // An open record always has a borrowed copy; refuse to commit otherwise.
            return Err(LendingError::Storage(format!(
                "copy {} of open record {} was not marked borrowed",
                record.copy_id, record.id
            )));
        }

        AuditRepository::append_in(
            &mut tx,
            NewAuditEntry::new(
                AuditKind::BookReturned,
                &record.student_id,
                format!("Returned copy {}, fine {}", record.copy_id, fine),
            )
            .copy(&record.copy_id)
            .record(&record.id)
            .snapshot(&record),
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            record_id = %record.id,
            copy_id = %record.copy_id,
            fine = %fine,
            "Book returned"
        );

        Ok(ReturnReceipt { record, fine })
    }

    // =========================================================================
    // Fines
    // =========================================================================

    /// Fine the record owes right now.
    ///
    /// Open records are priced by the same calculator a return would use at
    /// this instant; returned records report the amount fixed at return.
    pub async fn accrued_fine(&self, record_id: &str) -> LendingResult<Money> {
        self.bounded("accrued_fine", async {
            let record = self.record(record_id).await?;
            Ok(self.policy.fine_for(&record, self.now()))
        })
        .await
    }

    /// Marks the fine on a returned record as paid.
    ///
    /// ## Errors
    /// `FineNotSettleable` (Conflict) if the book is still out, nothing is
    /// owed, or the fine was already paid.
    pub async fn settle_fine(&self, record_id: &str) -> LendingResult<BorrowRecord> {
        self.bounded("settle_fine", self.settle_fine_inner(record_id))
            .await
    }

    async fn settle_fine_inner(&self, record_id: &str) -> LendingResult<BorrowRecord> {
        let now = self.now();
        let mut tx = self.db.begin().await?;

        let paid = BorrowRepository::mark_fine_paid_in(&mut tx, record_id, now).await?;
        let record = BorrowRepository::get_in(&mut tx, record_id)
            .await?
            .ok_or_else(|| LendingError::RecordNotFound {
                record_id: record_id.to_string(),
            })?;

        if !paid {
            record.ensure_fine_settleable()?;
            return Err(LendingError::Storage(format!(
                "fine on record {record_id} could not be marked paid"
            )));
        }

        AuditRepository::append_in(
            &mut tx,
            NewAuditEntry::new(
                AuditKind::FinePaid,
                &record.student_id,
                format!("Fine {} paid", record.fine()),
            )
            .copy(&record.copy_id)
            .record(&record.id),
            now,
        )
        .await?;

        tx.commit().await?;

        info!(record_id = %record.id, fine = %record.fine(), "Fine settled");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::testing::*;
    use crate::error::ErrorKind;
    use crate::identity::StaticVerifier;
    use chrono::{Duration, TimeZone, Utc};
    use libris_core::{BlacklistState, CopyStatus, VerificationMethod};
    use libris_db::{Database, DbConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_issue_then_return_on_time() {
        let h = harness().await;
        let title = h.title("Dune").await;
        let copy = h.copy(&title, "DUNE-001").await;
        let student = h.student("2024-0001").await;

        let record = h.engine.issue(&h.token(&student), &copy.id, None).await.unwrap();
        assert_eq!(record.due_at, t0() + Duration::days(1));
        assert_eq!(record.verified_by, VerificationMethod::Fingerprint);

        let shelf = h.engine.copy(&copy.id).await.unwrap();
        assert_eq!(shelf.status, CopyStatus::Borrowed);

        h.clock.advance(Duration::hours(12));
        let receipt = h.engine.return_book(&record.id).await.unwrap();
        assert_eq!(receipt.fine, Money::zero());
        assert_eq!(receipt.record.status, BorrowStatus::Returned);
        assert_eq!(receipt.record.returned_at, Some(t0() + Duration::hours(12)));

        let shelf = h.engine.copy(&copy.id).await.unwrap();
        assert_eq!(shelf.status, CopyStatus::Available);
    }

    #[tokio::test]
    async fn test_month_period_clamps_to_leap_february() {
        let h = harness().await;
        let title = h.title("Sapiens").await;
        let copy = h.copy(&title, "SAPI-001").await;
        let student = h.student("2024-0002").await;

        let record = h
            .engine
            .issue_for(&h.token(&student), &copy.id, 1, "months")
            .await
            .unwrap();
        assert_eq!(record.due_at, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_invalid_period_is_rejected_before_storage() {
        let h = harness().await;
        let title = h.title("Cosmos").await;
        let copy = h.copy(&title, "COSMOS-001").await;
        let student = h.student("2024-0003").await;

        let zero = h.engine.issue_for(&h.token(&student), &copy.id, 0, "days").await;
        assert_eq!(zero.unwrap_err().kind(), ErrorKind::Invalid);

        let unit = h
            .engine
            .issue_for(&h.token(&student), &copy.id, 2, "fortnights")
            .await;
        assert_eq!(unit.unwrap_err().kind(), ErrorKind::Invalid);

        assert!(h.engine.copy(&copy.id).await.unwrap().is_available());
    }

    #[tokio::test]
    async fn test_issue_failures_are_typed() {
        let h = harness().await;
        let title = h.title("Elements").await;
        let copy = h.copy(&title, "EUCL-001").await;
        let s1 = h.student("2024-0004").await;
        let s2 = h.student("2024-0005").await;

        let missing = h.engine.issue(&h.token(&s1), "no-such-copy", None).await;
        assert!(matches!(missing, Err(LendingError::CopyNotFound { .. })));
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);

        let ghost = token_for("ghost", t0());
        let unknown = h.engine.issue(&ghost, &copy.id, None).await;
        assert!(matches!(unknown, Err(LendingError::StudentUnknown { .. })));
        // The failed issue released its claim.
        assert!(h.engine.copy(&copy.id).await.unwrap().is_available());

        h.engine.issue(&h.token(&s1), &copy.id, None).await.unwrap();
        let taken = h.engine.issue(&h.token(&s2), &copy.id, None).await.unwrap_err();
        assert!(matches!(taken, LendingError::CopyUnavailable { .. }));
        assert_eq!(taken.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_double_return_fails_explicitly() {
        let h = harness().await;
        let title = h.title("Hobbit").await;
        let copy = h.copy(&title, "HOB-001").await;
        let student = h.student("2024-0006").await;

        let record = h.engine.issue(&h.token(&student), &copy.id, None).await.unwrap();
        h.engine.return_book(&record.id).await.unwrap();

        let again = h.engine.return_book(&record.id).await.unwrap_err();
        assert!(matches!(again, LendingError::AlreadyReturned { .. }));
        assert_eq!(again.kind(), ErrorKind::Conflict);

        let missing = h.engine.return_book("no-such-record").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        // Availability was credited exactly once.
        assert_eq!(h.engine.db().catalog().count_available(&title.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_late_return_fine_uses_ceiling_days() {
        let h = harness().await;
        let title = h.title("Calculus").await;
        let copy = h.copy(&title, "CALC-001").await;
        let student = h.student("2024-0007").await;

        let record = h.engine.issue(&h.token(&student), &copy.id, None).await.unwrap();

        // Due at t0 + 1 day; 1.5 days late rounds up to 2 days at 10 cents.
        h.clock.set(record.due_at + Duration::hours(36));
        assert_eq!(h.engine.accrued_fine(&record.id).await.unwrap(), Money::from_cents(20));

        let receipt = h.engine.return_book(&record.id).await.unwrap();
        assert_eq!(receipt.fine, Money::from_cents(20));

        // Fixed at return, no further accrual.
        h.clock.advance(Duration::days(30));
        assert_eq!(h.engine.accrued_fine(&record.id).await.unwrap(), Money::from_cents(20));
    }

    #[tokio::test]
    async fn test_settle_fine() {
        let h = harness().await;
        let title = h.title("Atlas").await;
        let copy = h.copy(&title, "ATLAS-001").await;
        let student = h.student("2024-0008").await;

        let record = h.engine.issue(&h.token(&student), &copy.id, None).await.unwrap();
        let still_out = h.engine.settle_fine(&record.id).await.unwrap_err();
        assert!(matches!(still_out, LendingError::FineNotSettleable { .. }));

        h.clock.set(record.due_at + Duration::days(1));
        h.engine.return_book(&record.id).await.unwrap();

        let paid = h.engine.settle_fine(&record.id).await.unwrap();
        assert!(paid.fine_paid());
        assert_eq!(paid.fine(), Money::from_cents(10));

        let twice = h.engine.settle_fine(&record.id).await.unwrap_err();
        assert_eq!(twice.kind(), ErrorKind::Conflict);

        let events = h.engine.audit_for_student(&student.id, 10).await.unwrap();
        assert_eq!(events[0].kind, AuditKind::FinePaid);
    }

    #[tokio::test]
    async fn test_expired_blacklist_allows_issue_and_clears_state() {
        let h = harness().await;
        let title = h.title("Gene").await;
        let copy = h.copy(&title, "GENE-001").await;
        let student = h.student("2024-0009").await;

        let until = t0() + Duration::days(1);
        let mut tx = h.engine.db().begin().await.unwrap();
        StudentRepository::set_blacklist(&mut tx, &student.id, until, "Overdue", t0())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let refused = h.engine.issue(&h.token(&student), &copy.id, None).await.unwrap_err();
        assert_eq!(refused.kind(), ErrorKind::PolicyViolation);
        match refused {
            LendingError::StudentBlacklisted { until: u, reason, .. } => {
                assert_eq!(u, until);
                assert_eq!(reason, "Overdue");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.engine.copy(&copy.id).await.unwrap().is_available());

        h.clock.set(until);
        h.engine.issue(&h.token(&student), &copy.id, None).await.unwrap();

        let stored = h.engine.db().students().get_by_id(&student.id).await.unwrap().unwrap();
        assert_eq!(stored.blacklist, BlacklistState::Clear);
        assert_eq!(
            h.engine.db().audit().count_kind(AuditKind::BlacklistExpired).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_issue_with_verification_audits_outcome() {
        let h = harness().await;
        let title = h.title("Mockingbird").await;
        let copy = h.copy(&title, "MOCK-001").await;
        let student = h.student("2024-0010").await;

        let verifier = StaticVerifier::new(Arc::new(ManualClock::new(t0()))).enroll(
            &student.id,
            VerificationMethod::Face,
            b"face-template".to_vec(),
        );

        let bad = IdentityClaim {
            student_id: student.id.clone(),
            method: VerificationMethod::Face,
            sample: b"someone-else".to_vec(),
        };
        let err = h
            .engine
            .issue_with_verification(&verifier, &bad, &copy.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::VerificationFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
        assert!(h.engine.copy(&copy.id).await.unwrap().is_available());

        let good = IdentityClaim {
            sample: b"face-template".to_vec(),
            ..bad
        };
        let record = h
            .engine
            .issue_with_verification(&verifier, &good, &copy.id, None)
            .await
            .unwrap();
        assert_eq!(record.verified_by, VerificationMethod::Face);

        let audit = h.engine.db().audit();
        assert_eq!(audit.count_kind(AuditKind::VerificationFailed).await.unwrap(), 1);
        assert_eq!(audit.count_kind(AuditKind::IdentityVerified).await.unwrap(), 1);
        assert_eq!(audit.count_kind(AuditKind::BookIssued).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_of_one_copy_has_one_winner() {
        let path = std::env::temp_dir().join(format!("libris-race-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(4)).await.unwrap();
        let h = harness_on(db).await;

        let title = h.title("Nineteen Eighty-Four").await;
        let copy = h.copy(&title, "1984-001").await;
        let s2 = h.student("2024-0011").await;
        let s3 = h.student("2024-0012").await;

        let t2 = h.token(&s2);
        let t3 = h.token(&s3);
        let (a, b) = tokio::join!(
            h.engine.issue(&t2, &copy.id, None),
            h.engine.issue(&t3, &copy.id, None),
        );

        let outcomes = [a, b];
        let wins = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.kind(), ErrorKind::Conflict);

        assert_eq!(h.engine.db().borrows().count_open_for_copy(&copy.id).await.unwrap(), 1);

        h.engine.db().close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_returns_of_one_record_have_one_winner() {
        let path = std::env::temp_dir().join(format!("libris-return-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(4)).await.unwrap();
        let h = harness_on(db).await;

        let title = h.title("Brave New World").await;
        let copy = h.copy(&title, "BNW-001").await;
        let student = h.student("2024-0013").await;
        let record = h.engine.issue(&h.token(&student), &copy.id, None).await.unwrap();
        h.clock.advance(Duration::days(3));

        let (a, b) = tokio::join!(
            h.engine.return_book(&record.id),
            h.engine.return_book(&record.id),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(loser, LendingError::AlreadyReturned { .. }));
        assert_eq!(loser.kind(), ErrorKind::Conflict);

        // One close, one release, one audit row.
        assert_eq!(h.engine.copy(&copy.id).await.unwrap().status, CopyStatus::Available);
        assert_eq!(
            h.engine.db().audit().count_kind(AuditKind::BookReturned).await.unwrap(),
            1
        );

        h.engine.db().close().await;
        let _ = std::fs::remove_file(&path);
    }
}
