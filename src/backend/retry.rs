//! Bounded retry with exponential backoff for remote calls.
//!
//! A `RetryPolicy` is a plain value: attempt count, base delay, growth factor
//! and a per-attempt timeout. Every call to the remote service goes through
//! [`RetryPolicy::run`], so the worst-case latency of a call is bounded by
//! `max_attempts * attempt_timeout + sum(backoffs)`.

use std::future::Future;
use std::time::Duration;

use crate::error::BackendError;

/// Retry schedule for one class of remote call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Short informational lookups: 2 attempts, 500 ms base, 2 s per attempt.
    pub fn informational() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(2),
        }
    }

    /// One attempt with the given timeout. Used for non-idempotent calls.
    pub fn single(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
            attempt_timeout,
        }
    }

    /// Delay before attempt number `attempt` (1-based). The first attempt
    /// never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        self.base_delay.mul_f64(self.backoff_factor.powi(exponent))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is cut off at `attempt_timeout`. Only transient errors
    /// (see [`BackendError::is_transient`]) are retried.
    pub async fn run<T, F, Fut>(&self, endpoint: &str, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout: self.attempt_timeout,
                }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(endpoint, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(endpoint, attempt, error = %e, "Remote call failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::warn!(endpoint, attempt, error = %e, "Remote call failed");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::Unavailable {
            endpoint: endpoint.to_string(),
            reason: "no attempts made".to_string(),
        }))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::informational()
    }
}
