//! # Repository Module
//!
//! Database repository implementations for Libris.
//!
//! ## Two Kinds of Methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  &self methods              run on the pool                            │
//! │  ├── lookups, listings, counts                                         │
//! │  └── catalog/directory registration                                    │
//! │                                                                         │
//! │  associated fns (*_in,      run on a caller-supplied connection        │
//! │   claim_/release_/set_...)  ├── used inside one engine transaction     │
//! │                             └── never touch the pool, so a single-     │
//! │                                 connection pool cannot deadlock        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Titles and copies
//! - [`student::StudentRepository`] - Borrower directory and blacklist columns
//! - [`borrow::BorrowRepository`] - The lending ledger
//! - [`audit::AuditRepository`] - Append-only audit trail
//!
//! Row structs derive `sqlx::FromRow` and stay private; every method returns
//! `libris-core` types.

pub mod audit;
pub mod borrow;
pub mod catalog;
pub mod student;
