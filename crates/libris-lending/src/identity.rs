//! # Identity Verification Contract
//!
//! The desk captures a fingerprint or face and hands it to an external
//! matcher. This crate only consumes the outcome:
//!
//! ```text
//!   IdentityClaim ──► IdentityVerifier::verify ──┬──► VerifiedStudentId ──► issue
//!                                                └──► VerificationFailed ──► PolicyViolation
//! ```
//!
//! [`StaticVerifier`] is an in-process stand-in for development and tests:
//! it accepts a claim only when the sample bytes equal the enrolled ones.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use libris_core::identity::{IdentityClaim, VerificationFailed};
use libris_core::{VerificationMethod, VerifiedStudentId};

use crate::clock::Clock;

/// The external identity matcher.
pub trait IdentityVerifier: Send + Sync {
    fn verify(
        &self,
        claim: &IdentityClaim,
    ) -> impl Future<Output = Result<VerifiedStudentId, VerificationFailed>> + Send;
}

/// Enrolled samples held in memory, compared byte for byte.
pub struct StaticVerifier {
    enrolled: HashMap<(String, VerificationMethod), Vec<u8>>,
    clock: Arc<dyn Clock>,
}

impl StaticVerifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        StaticVerifier {
            enrolled: HashMap::new(),
            clock,
        }
    }

    /// Registers the sample a student must present for `method`.
    pub fn enroll(
        mut self,
        student_id: impl Into<String>,
        method: VerificationMethod,
        sample: impl Into<Vec<u8>>,
    ) -> Self {
        self.enrolled.insert((student_id.into(), method), sample.into());
        self
    }
}

impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, claim: &IdentityClaim) -> Result<VerifiedStudentId, VerificationFailed> {
        match self.enrolled.get(&(claim.student_id.clone(), claim.method)) {
            None => Err(VerificationFailed::new(format!(
                "no {} enrolled for {}",
                claim.method, claim.student_id
            ))),
            Some(sample) if *sample == claim.sample => {
                Ok(VerifiedStudentId::matched(claim, self.clock.now()))
            }
            Some(_) => Err(VerificationFailed::new(format!("{} did not match", claim.method))),
        }
    }
}
