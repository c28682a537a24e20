//! # Catalog & Directory
//!
//! Registration of titles, copies and students, and the read-side queries
//! support tooling uses. None of these touch an open loan, so they run on
//! the pool without an engine transaction.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use libris_core::validation::{validate_identifier, validate_name, validate_optional};
use libris_core::{
    AuditEntry, BlacklistState, BookCopy, BookTitle, BorrowRecord, CoreError, CopyStatus,
    LoanPeriod, Money, Student,
};
use libris_db::repository::catalog::{generate_copy_id, generate_title_id};
use libris_db::repository::student::generate_student_id;
use libris_db::OpenLoan;

use crate::engine::LendingEngine;
use crate::error::{LendingError, LendingResult};

/// A title to add to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTitle {
    pub title: String,
    pub author: String,
    pub category: String,
    /// Falls back to the library policy's default period.
    pub default_period: Option<LoanPeriod>,
}

/// A student to add to the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    pub student_number: String,
    pub full_name: String,
    pub class_name: Option<String>,
    pub email: Option<String>,
}

/// An open loan past due, priced at the time of the query.
#[derive(Debug, Clone, Serialize)]
pub struct OverdueLoan {
    pub record_id: String,
    pub copy_id: String,
    pub student_id: String,
    pub serial: String,
    pub title: String,
    pub due_at: chrono::DateTime<chrono::Utc>,
    pub overdue_for: i64,
    pub accrued_fine: Money,
    /// Whether a sweep has flagged it yet.
    pub flagged: bool,
}

impl LendingEngine {
    // =========================================================================
    // Registration
    // =========================================================================

    pub async fn add_title(&self, new: NewTitle) -> LendingResult<BookTitle> {
        let now = self.now();
        let title = BookTitle {
            id: generate_title_id(),
            title: validate_name("title", &new.title)?,
            author: validate_name("author", &new.author)?,
            category: validate_name("category", &new.category)?,
            default_period: new.default_period.unwrap_or(self.policy.default_period),
            created_at: now,
            updated_at: now,
        };

        self.bounded("add_title", async { Ok(self.db.catalog().insert_title(&title).await?) })
            .await?;

        info!(id = %title.id, title = %title.title, period = %title.default_period, "Title added");
        Ok(title)
    }

    /// Registers a physical copy of `title_id` under a unique serial.
    pub async fn add_copy(&self, title_id: &str, serial: &str) -> LendingResult<BookCopy> {
        let serial = validate_identifier("serial", serial)?;

        self.bounded("add_copy", async {
            if self.db.catalog().get_title(title_id).await?.is_none() {
                return Err(LendingError::TitleNotFound {
                    title_id: title_id.to_string(),
                });
            }

            let now = self.now();
            let copy = BookCopy {
                id: generate_copy_id(),
                title_id: title_id.to_string(),
                serial,
                status: CopyStatus::Available,
                created_at: now,
                updated_at: now,
            };
            self.db.catalog().insert_copy(&copy).await?;

            info!(id = %copy.id, serial = %copy.serial, "Copy added");
            Ok(copy)
        })
        .await
    }

    pub async fn register_student(&self, new: NewStudent) -> LendingResult<Student> {
        let now = self.now();
        let student = Student {
            id: generate_student_id(),
            student_number: validate_identifier("student number", &new.student_number)?,
            full_name: validate_name("full name", &new.full_name)?,
            class_name: validate_optional("class", new.class_name.as_deref())?,
            email: validate_optional("email", new.email.as_deref())?,
            blacklist: BlacklistState::Clear,
            created_at: now,
            updated_at: now,
        };

        self.bounded("register_student", async {
            Ok(self.db.students().insert(&student).await?)
        })
        .await?;

        info!(id = %student.id, student_number = %student.student_number, "Student registered");
        Ok(student)
    }

    /// Changes a title's default loan period. Allowed while copies exist;
    /// loans already issued keep their due date.
    pub async fn update_due_period(
        &self,
        title_id: &str,
        period: LoanPeriod,
    ) -> LendingResult<BookTitle> {
        self.bounded("update_due_period", async {
            self.db
                .catalog()
                .update_due_period(title_id, period, self.now())
                .await?;
            self.title(title_id).await
        })
        .await
    }

    /// Edits title, author and category. Refused once any copy exists.
    pub async fn update_title_details(
        &self,
        title_id: &str,
        title: &str,
        author: &str,
        category: &str,
    ) -> LendingResult<BookTitle> {
        let title = validate_name("title", title)?;
        let author = validate_name("author", author)?;
        let category = validate_name("category", category)?;

        self.bounded("update_title_details", async {
            let catalog = self.db.catalog();
            if !catalog
                .update_details(title_id, &title, &author, &category, self.now())
                .await?
            {
                // Missing, or locked by its copies.
                self.title(title_id).await?;
                let copies = catalog.count_copies(title_id).await?;
                return Err(CoreError::TitleLocked {
                    title_id: title_id.to_string(),
                    copies,
                }
                .into());
            }
            self.title(title_id).await
        })
        .await
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn title(&self, title_id: &str) -> LendingResult<BookTitle> {
        self.bounded("title", async {
            self.db
                .catalog()
                .get_title(title_id)
                .await?
                .ok_or_else(|| LendingError::TitleNotFound {
                    title_id: title_id.to_string(),
                })
        })
        .await
    }

    pub async fn copy(&self, copy_id: &str) -> LendingResult<BookCopy> {
        self.bounded("copy", async {
            self.db
                .catalog()
                .get_copy(copy_id)
                .await?
                .ok_or_else(|| LendingError::CopyNotFound {
                    copy_id: copy_id.to_string(),
                })
        })
        .await
    }

    pub async fn record(&self, record_id: &str) -> LendingResult<BorrowRecord> {
        self.bounded("record", async {
            self.db
                .borrows()
                .get_by_id(record_id)
                .await?
                .ok_or_else(|| LendingError::RecordNotFound {
                    record_id: record_id.to_string(),
                })
        })
        .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// A student's open loans, soonest due first.
    pub async fn student_loans(&self, student_id: &str) -> LendingResult<Vec<BorrowRecord>> {
        self.bounded("student_loans", async {
            Ok(self.db.borrows().list_open_for_student(student_id).await?)
        })
        .await
    }

    /// Every loan a student ever had, newest first.
    pub async fn student_history(&self, student_id: &str) -> LendingResult<Vec<BorrowRecord>> {
        self.bounded("student_history", async {
            Ok(self.db.borrows().list_for_student(student_id).await?)
        })
        .await
    }

    /// Every loan of one copy, newest first.
    pub async fn copy_history(&self, copy_id: &str) -> LendingResult<Vec<BorrowRecord>> {
        self.bounded("copy_history", async {
            Ok(self.db.borrows().list_for_copy(copy_id).await?)
        })
        .await
    }

    /// Open loans past due right now, most overdue first.
    pub async fn overdue_loans(&self) -> LendingResult<Vec<OverdueLoan>> {
        self.bounded("overdue_loans", async {
            let now = self.now();
            let rate = self.policy.fine_rate_per_day;
            let loans: Vec<OpenLoan> = self.db.borrows().list_open_loans().await?;

            let mut overdue: Vec<OverdueLoan> = loans
                .into_iter()
                .filter(|loan| loan.due_at < now)
                .map(|loan| OverdueLoan {
                    overdue_for: libris_core::fine::overdue_days(loan.due_at, now),
                    accrued_fine: libris_core::fine::fine(loan.due_at, now, rate),
                    flagged: loan.overdue_since.is_some(),
                    record_id: loan.record_id,
                    copy_id: loan.copy_id,
                    student_id: loan.student_id,
                    serial: loan.serial,
                    title: loan.title,
                    due_at: loan.due_at,
                })
                .collect();

            overdue.sort_by_key(|loan| loan.due_at);
            Ok(overdue)
        })
        .await
    }

    /// Audit entries about a student, newest first.
    pub async fn audit_for_student(
        &self,
        student_id: &str,
        limit: u32,
    ) -> LendingResult<Vec<AuditEntry>> {
        self.bounded("audit_for_student", async {
            Ok(self.db.audit().list_for_student(student_id, limit).await?)
        })
        .await
    }

    /// Most recent audit entries across the library.
    pub async fn recent_audit(&self, limit: u32) -> LendingResult<Vec<AuditEntry>> {
        self.bounded("recent_audit", async { Ok(self.db.audit().recent(limit).await?) })
            .await
    }

    /// Loans that fall due within `horizon`, for reminder notices.
    pub async fn due_within(&self, horizon: Duration) -> LendingResult<Vec<OpenLoan>> {
        self.bounded("due_within", async {
            let now = self.now();
            let until = now
                .checked_add_signed(horizon)
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
            let mut loans = self.db.borrows().list_open_loans().await?;
            loans.retain(|loan| loan.due_at >= now && loan.due_at <= until);
            loans.sort_by_key(|loan| loan.due_at);
            Ok(loans)
        })
        .await
    }
}
