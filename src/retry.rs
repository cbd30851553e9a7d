// src/retry.rs

//! Bounded retry policy for storage bootstrap operations.
//!
//! This policy is consumed by the bucket/table bootstrap glue only. The two
//! core protocols (chunked upload, conditional update) have their own
//! convergence logic and never go through this module.

use std::time::Duration;

use crate::config::RetrySettings;

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt (2.0 doubles the delay each time).
    pub backoff_multiplier: f64,
    /// Whether to spread delays with deterministic jitter.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.retry_delay_ms),
            max_delay: Duration::from_millis(settings.max_retry_delay_ms),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Policy that fails on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Returns true if another retry is allowed for the given attempt
    /// (0-indexed).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            // Up to 25% jitter, seeded by the attempt number
            capped * (1.0 + seeded_unit(attempt) * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

/// Deterministic pseudo-random value in [0, 1) derived from the attempt
/// number, so backoff sequences are reproducible in tests.
fn seeded_unit(seed: u32) -> f64 {
    // LCG step
    let x = seed.wrapping_mul(1103515245).wrapping_add(12345);
    (x as f64) / (u32::MAX as f64)
}

/// Classification of one attempt of a retryable operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// Attempt succeeded.
    Ok(T),
    /// Attempt failed with a transient error; retry with delay.
    Transient(E),
    /// Attempt failed with a fatal error; stop immediately.
    Fatal(E),
}

impl<T, E> RetryOutcome<T, E> {
    /// Converts to a standard Result, dropping the retry classification.
    pub fn into_result(self) -> std::result::Result<T, E> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Transient(e) | Self::Fatal(e) => Err(e),
        }
    }
}

/// Runs an async operation under the policy, sleeping between transient
/// failures until the retry budget is exhausted.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = RetryOutcome<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            RetryOutcome::Ok(value) => return Ok(value),
            RetryOutcome::Fatal(error) => return Err(error),
            RetryOutcome::Transient(error) => {
                if !policy.should_retry(attempt) {
                    return Err(error);
                }

                tracing::debug!(attempt, "retrying after transient storage error");
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}
