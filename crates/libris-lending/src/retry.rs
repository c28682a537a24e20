//! # Retry Helper
//!
//! Caller-side retry for `Transient` failures (busy SQLite, operation
//! timeout). Every other error kind is returned on the first attempt.
//!
//! ```text
//!   attempt ──► Ok ──────────────────────────────► return
//!      │
//!      ├──► Err(kind != Transient) ──────────────► return
//!      │
//!      └──► Err(Transient) ──► next_backoff() ──┬─► sleep, attempt again
//!                                               └─► None (max elapsed) ─► return last error
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::LendingResult;

/// Bounds for [`retry_transient`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total time budget across attempts.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_elapsed: Duration::from_millis(settings.max_elapsed_ms),
        }
    }
}

impl RetryPolicy {
    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };
        // The elapsed budget counts from here, not from `Default::default()`.
        backoff.reset();
        backoff
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// backoff budget runs out.
///
/// ## Example
/// ```rust,ignore
/// let record = retry_transient(RetryPolicy::default(), || {
///     engine.issue(&token, &copy_id, None)
/// })
/// .await?;
/// ```
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut op: F) -> LendingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LendingResult<T>>,
{
    let mut backoff = policy.create_backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        match backoff.next_backoff() {
            Some(duration) => {
                debug!(?duration, attempt, error = %err, "Transient failure, backing off");
                tokio::time::sleep(duration).await;
            }
            None => {
                warn!(attempt, error = %err, "Retry budget exhausted");
                return Err(err);
            }
        }
    }
}
