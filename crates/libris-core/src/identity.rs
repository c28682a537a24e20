//! # Verified Identity
//!
//! Types exchanged with the identity-verification collaborator.
//!
//! ```text
//!   desk ── IdentityClaim ──► verifier (fingerprint / face, external)
//!                                 │
//!                 ┌───────────────┴───────────────┐
//!                 ▼                               ▼
//!        VerifiedStudentId              VerificationFailed(reason)
//!                 │
//!                 ▼
//!        Issue(copy, &VerifiedStudentId, period)
//! ```
//!
//! Matching itself never happens in this workspace. Issue takes a
//! `&VerifiedStudentId`, so a borrow cannot be recorded from a bare id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a borrower's identity was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Fingerprint,
    Face,
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationMethod::Fingerprint => write!(f, "fingerprint"),
            VerificationMethod::Face => write!(f, "face"),
        }
    }
}

/// What the desk sends to the verifier.
#[derive(Debug, Clone)]
pub struct IdentityClaim {
    /// Student the borrower claims to be (typed in or read from the card).
    pub student_id: String,
    pub method: VerificationMethod,
    /// Opaque capture, passed through untouched.
    pub sample: Vec<u8>,
}

/// Proof that the verifier matched a capture to a student.
///
/// Only minted from an [`IdentityClaim`] by a verifier, and never
/// deserialized, so a token cannot arrive from outside the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedStudentId {
    student_id: String,
    method: VerificationMethod,
    verified_at: DateTime<Utc>,
}

impl VerifiedStudentId {
    /// Issued by verifier implementations once `claim` matched.
    pub fn matched(claim: &IdentityClaim, verified_at: DateTime<Utc>) -> Self {
        VerifiedStudentId {
            student_id: claim.student_id.clone(),
            method: claim.method,
            verified_at,
        }
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn method(&self) -> VerificationMethod {
        self.method
    }

    pub fn verified_at(&self) -> DateTime<Utc> {
        self.verified_at
    }
}

/// The verifier could not confirm the claim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Identity verification failed: {reason}")]
pub struct VerificationFailed {
    pub reason: String,
}

impl VerificationFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        VerificationFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_accessors() {
        let at = Utc::now();
        let claim = IdentityClaim {
            student_id: "stu-9".to_string(),
            method: VerificationMethod::Face,
            sample: vec![1, 2, 3],
        };
        let token = VerifiedStudentId::matched(&claim, at);
        assert_eq!(token.student_id(), "stu-9");
        assert_eq!(token.method(), VerificationMethod::Face);
        assert_eq!(token.verified_at(), at);
    }

    #[test]
    fn test_failure_message() {
        let err = VerificationFailed::new("no match above threshold");
        assert_eq!(
            err.to_string(),
            "Identity verification failed: no match above threshold"
        );
    }
}
