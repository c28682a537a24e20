//! # Blacklist Operations
//!
//! Reads of a student's blacklist attribute and the admin lift.
//!
//! Windows are opened only by the overdue sweep ([`crate::sweep`]). They
//! close in one of two ways:
//! - lapse: the first read at or after `until` clears the stored columns
//!   and audits `BlacklistExpired`
//! - lift: [`LendingEngine::unblacklist`] clears them unconditionally and
//!   audits `AdminUnblacklist` with the admin's reason

use tracing::info;

use libris_core::validation::validate_reason;
use libris_core::{AuditKind, NewAuditEntry, Student};
use libris_db::{AuditRepository, StudentRepository};

use crate::engine::{expire_lapsed_in, LendingEngine};
use crate::error::{LendingError, LendingResult};

impl LendingEngine {
    /// Lifts a student's blacklist, active or not.
    ///
    /// Always writes an `AdminUnblacklist` audit entry carrying `reason`.
    pub async fn unblacklist(&self, student_id: &str, reason: &str) -> LendingResult<Student> {
        let reason = validate_reason(reason)?;
        self.bounded("unblacklist", self.unblacklist_inner(student_id, reason))
            .await
    }

    async fn unblacklist_inner(&self, student_id: &str, reason: String) -> LendingResult<Student> {
        let now = self.now();
        let mut tx = self.db.begin().await?;

        if !StudentRepository::clear_blacklist(&mut tx, student_id, now).await? {
            return Err(LendingError::StudentUnknown {
                student_id: student_id.to_string(),
            });
        }

        AuditRepository::append_in(
            &mut tx,
            NewAuditEntry::new(AuditKind::AdminUnblacklist, student_id, reason.clone()),
            now,
        )
        .await?;

        let student = StudentRepository::get_in(&mut tx, student_id)
            .await?
            .ok_or_else(|| LendingError::StudentUnknown {
                student_id: student_id.to_string(),
            })?;

        tx.commit().await?;

        info!(student_id = %student_id, reason = %reason, "Blacklist lifted by admin");
        Ok(student)
    }

    /// Loads a student, clearing a lapsed blacklist window on the way.
    pub async fn student(&self, student_id: &str) -> LendingResult<Student> {
        self.bounded("student", async {
            let student = self
                .db
                .students()
                .get_by_id(student_id)
                .await?
                .ok_or_else(|| LendingError::StudentUnknown {
                    student_id: student_id.to_string(),
                })?;

            self.expire_if_lapsed(student).await
        })
        .await
    }

    /// Students with a window that is still active, lapsed ones cleared.
    pub async fn blacklisted_students(&self) -> LendingResult<Vec<Student>> {
        self.bounded("blacklisted_students", async {
            let stored = self.db.students().list_blacklisted().await?;
            let mut active = Vec::with_capacity(stored.len());

            for student in stored {
                let student = self.expire_if_lapsed(student).await?;
                if student.blacklist_at(self.now()).until().is_some() {
                    active.push(student);
                }
            }

            Ok(active)
        })
        .await
    }

    async fn expire_if_lapsed(&self, mut student: Student) -> LendingResult<Student> {
        let now = self.now();
        if !student.blacklist.is_expired_at(now) {
            return Ok(student);
        }

        let mut tx = self.db.begin().await?;
        expire_lapsed_in(&mut tx, &mut student, now).await?;
        tx.commit().await?;

        Ok(student)
    }
}
