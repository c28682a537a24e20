//! # libris-lending: Borrowing Lifecycle Engine for Libris
//!
//! This crate runs every state change of the school library: issuing a
//! copy to a verified student, taking it back and pricing the fine,
//! settling fines, the overdue sweep that opens blacklist windows, and the
//! admin lift.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Lending Architecture                             │
//! │                                                                         │
//! │  desk / kiosk / admin tooling              libris-sweeper (bin)         │
//! │        │                                          │                     │
//! │        │  IdentityVerifier ──► VerifiedStudentId  │  SweepRunner        │
//! │        ▼                                          ▼                     │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        LendingEngine                             │  │
//! │  │                                                                  │  │
//! │  │  ledger     issue, return_book, accrued_fine, settle_fine        │  │
//! │  │  blacklist  student (lazy expiry), unblacklist                   │  │
//! │  │  sweep      run_sweep                                            │  │
//! │  │  registry   titles, copies, students, queries                    │  │
//! │  │                                                                  │  │
//! │  │  every call: timeout ─► one transaction ─► CAS write first       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  libris-core   │  │   libris-db    │  │  Clock                 │    │
//! │  │  fine, period, │  │  SQLite (WAL)  │  │  SystemClock in prod,  │    │
//! │  │  policy rules  │  │  repositories  │  │  ManualClock in tests  │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `LendingEngine` facade, deadlines, lazy blacklist expiry
//! - [`ledger`] - Issue, return and fine settlement
//! - [`blacklist`] - Student reads and the admin lift
//! - [`sweep`] - Overdue sweep and its periodic runner
//! - [`registry`] - Catalog/directory registration and queries
//! - [`identity`] - Identity verification seam
//! - [`clock`] - Injectable time source
//! - [`config`] - TOML configuration with env overrides
//! - [`retry`] - Backoff for transient failures
//! - [`error`] - Error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use libris_lending::{LendingConfig, LendingEngine};
//!
//! let config = LendingConfig::load(None)?;
//! let engine = LendingEngine::from_config(&config).await?;
//!
//! let record = engine.issue(&verified, &copy_id, None).await?;
//! let receipt = engine.return_book(&record.id).await?;
//! println!("Fine due: {}", receipt.fine);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod retry;

// Operations on LendingEngine
pub mod blacklist;
pub mod ledger;
pub mod registry;
pub mod sweep;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LendingConfig;
pub use engine::{LendingEngine, DEFAULT_OPERATION_TIMEOUT};
pub use error::{ErrorKind, LendingError, LendingResult};
pub use identity::{IdentityVerifier, StaticVerifier};
pub use ledger::ReturnReceipt;
pub use registry::{NewStudent, NewTitle, OverdueLoan};
pub use retry::{retry_transient, RetryPolicy};
pub use sweep::{SweepReport, SweepRunner, SweepRunnerHandle};
