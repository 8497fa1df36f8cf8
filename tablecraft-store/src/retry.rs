//! Bounded exponential backoff.

use crate::error::{StoreError, TransportError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff settings shared by single calls, batch rounds and transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per call, first one included.
    pub max_attempts: u32,
    /// Resubmission rounds for unprocessed batch items, after the first.
    pub max_rounds: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_rounds: 5,
            base_delay_ms: 50,
            multiplier: 2,
            max_delay_ms: 2_000,
        }
    }
}

/// A call that kept failing, with the number of attempts made.
#[derive(Debug)]
pub(crate) struct Exhausted {
    pub error: TransportError,
    pub attempts: u32,
}

impl From<Exhausted> for StoreError {
    fn from(exhausted: Exhausted) -> Self {
        StoreError::from_transport(exhausted.error, exhausted.attempts)
    }
}

impl RetryPolicy {
    /// No retries at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            max_rounds: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based): `base * multiplier^retry`,
    /// capped at `max_delay_ms`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(retry);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Runs `call` until it succeeds, fails with an error `retry_on` rejects,
    /// or runs out of attempts.
    pub(crate) async fn run<T, F, Fut, R>(
        &self,
        operation: &str,
        retry_on: R,
        mut call: F,
    ) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
        R: Fn(&TransportError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && retry_on(&error) => {
                    let delay = self.delay_for(attempt - 1);
                    if error.is_throttling() {
                        warn!(operation, attempt, delay_ms = delay.as_millis() as u64, "throttled, backing off");
                    } else {
                        debug!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying");
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if attempt > 1 {
                        warn!(operation, attempts = attempt, error = %error, "giving up");
                    }
                    return Err(Exhausted { error, attempts: attempt });
                }
            }
        }
    }
}

/// Retry predicate for writes: throttling only.
pub(crate) fn throttling(error: &TransportError) -> bool {
    error.is_throttling()
}

/// Retry predicate for idempotent reads: throttling and connection failures.
pub(crate) fn transient(error: &TransportError) -> bool {
    error.is_transient()
}
