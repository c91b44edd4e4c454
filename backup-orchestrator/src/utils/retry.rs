//! Capped exponential backoff with jitter.

use crate::utils::errors::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff policy. Attempts are counted from 1; the delay before retry `n`
/// is `initial * factor^(n-1)`, capped at `max_delay_ms`, plus up to
/// `jitter * delay` of random slack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Control-plane token calls.
    pub fn token() -> Self {
        Self {
            initial_delay_ms: 2_000,
            factor: 2.0,
            max_delay_ms: 16_000,
            jitter: 0.1,
            max_attempts: 5,
        }
    }

    /// Index repair under lock contention.
    pub fn repair() -> Self {
        Self {
            initial_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 10_000,
            jitter: 0.1,
            max_attempts: 10,
        }
    }

    /// No delay between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay_ms: 0,
            factor: 1.0,
            max_delay_ms: 0,
            jitter: 0.0,
            max_attempts,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let base = self.initial_delay_ms as f64 * self.factor.max(1.0).powi(exponent);
        let capped = base.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
        delay + Duration::from_millis(fastrand::u64(0..=jitter_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::token()
    }
}

/// Retry `attempt` on any error except cancellation.
pub async fn retry<T, F, Fut>(
    policy: &BackoffPolicy,
    operation: &str,
    cancel: &CancellationToken,
    attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(policy, operation, cancel, |_| true, attempt).await
}

/// Retry `attempt` while `should_retry` accepts the error and attempts remain.
/// Sleeps are interrupted by `cancel`; a canceled attempt is never retried.
pub async fn retry_when<T, F, Fut, P>(
    policy: &BackoffPolicy,
    operation: &str,
    cancel: &CancellationToken,
    should_retry: P,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&OrchestratorError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Canceled);
        }
        attempts += 1;

        match attempt().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(
                        "'{}' succeeded after {} attempts in {:?}",
                        operation,
                        attempts,
                        started.elapsed()
                    );
                }
                return Ok(value);
            }
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                if attempts >= max_attempts || !should_retry(&e) {
                    return Err(e);
                }

                let delay = policy.jittered(policy.delay_for(attempts));
                warn!(
                    "'{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation, attempts, max_attempts, e, delay
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(OrchestratorError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
