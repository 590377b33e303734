//! Bounded exponential backoff applied to every provider call

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Default number of attempts per call (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Retry policy for transient provider failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, doubled for each retry after that
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// Result of a retried call together with the number of attempts spent
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: ProviderResult<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (zero-based): `base * 2^retry`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << retry.min(31));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient errors are retried. Cancellation interrupts both the
    /// call in flight and any backoff sleep.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                result = call() => result,
            };

            match result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{} succeeded after {} attempts", operation, attempts);
                    }
                    return Attempted { result: Ok(value), attempts };
                }
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    let delay = self.delay_for(attempts - 1);
                    warn!(
                        "⚠️ {} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempts, max_attempts, e, delay
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Attempted { result: Err(ProviderError::Cancelled), attempts };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Attempted { result: Err(e), attempts },
            }
        }
    }
}
