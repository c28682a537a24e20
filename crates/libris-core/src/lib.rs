//! # libris-core: Pure Lending Rules for Libris
//!
//! This crate holds every rule of the borrowing lifecycle that can be
//! expressed without touching storage: due-date arithmetic, fine accrual,
//! blacklist decisions, validation, and the domain types they operate on.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Libris Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              libris-lending (engine facade)                     │   │
//! │  │   Issue ─ Return ─ RunSweep ─ Unblacklist ─ SettleFine          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ libris-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │   │
//! │  │   │  types   │ │  period  │ │   fine   │ │     policy       │  │   │
//! │  │   │ Copy     │ │ LoanPer. │ │ fine()   │ │ LibraryPolicy    │  │   │
//! │  │   │ Student  │ │ due_at() │ │ Money    │ │ BlacklistDecision│  │   │
//! │  │   │ Record   │ │ Months   │ │ ceil/day │ │ effective state  │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    libris-db (Database Layer)                   │   │
//! │  │            SQLite queries, migrations, repositories             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (BookTitle, BookCopy, Student, BorrowRecord, AuditEntry)
//! - [`period`] - Loan periods and calendar-aware due-date computation
//! - [`fine`] - The fine calculator
//! - [`policy`] - Library policy values and blacklist decisions
//! - [`identity`] - Verified-identity token handed out by the verification collaborator
//! - [`money`] - Money type with integer arithmetic
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use libris_core::fine::fine;
//! use libris_core::money::Money;
//!
//! let due = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
//! let now = due + Duration::hours(36);
//!
//! // 1.5 days late rounds up to 2 days
//! assert_eq!(fine(due, now, Money::from_cents(10)).cents(), 20);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fine;
pub mod identity;
pub mod money;
pub mod period;
pub mod policy;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use identity::{VerificationMethod, VerifiedStudentId};
pub use money::Money;
pub use period::{LoanPeriod, PeriodUnit};
pub use policy::{BlacklistDecision, LibraryPolicy};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default blacklist window applied by the overdue sweep, in days.
pub const DEFAULT_BLACKLIST_WINDOW_DAYS: i64 = 14;

/// Default fine per started overdue day, in minor currency units.
pub const DEFAULT_FINE_RATE_CENTS: i64 = 10;

/// Upper bound on a loan period value, regardless of unit.
///
/// Keeps due-date arithmetic far away from chrono's representable range.
pub const MAX_PERIOD_VALUE: i64 = 10_000;
