//! # Bounded Retry for Transient Storage Failures
//!
//! Storage writes, rollback deletions and the conditional fast-path write are
//! wrapped in a small bounded retry policy with exponential backoff. Only
//! errors classified transient by [`Error::is_transient`] are retried;
//! everything else propagates unchanged on the first failure.
//!
//! Lease renewal is deliberately *not* routed through this policy: a failed
//! renewal is fatal (see [`crate::lock`]).

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Default number of attempts (the first try plus two retries).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay before the first retry.
const DEFAULT_BASE_DELAY_MS: u64 = 50;

/// Default cap on the backoff delay.
const DEFAULT_MAX_DELAY_MS: u64 = 1000;

/// A bounded retry policy with capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles each subsequent retry.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Runs `op`, retrying transient failures up to the attempt bound.
    ///
    /// The last error is returned unchanged once attempts are exhausted, so
    /// callers see the underlying failure rather than a retry wrapper.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !err.is_transient() {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }

    /// Backoff delay before retry number `retry` (0-based): doubled each
    /// step, capped at `max_delay`.
    fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// =============================================================================
// Tests
// =============================================================================
