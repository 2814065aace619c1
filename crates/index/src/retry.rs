use extract::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Exponential backoff around ingestion-time provider calls.
///
/// Timeouts and failed calls are retried. A malformed response is returned
/// at once since asking again for the same input rarely changes it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    fn backoff_for(&self, retry: usize) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    pub async fn retry<F, Fut, T>(&self, operation: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut retries = 0;
        loop {
            let err = match call().await {
                Ok(value) => {
                    if retries > 0 {
                        info!(operation, attempts = retries + 1, "Provider call recovered after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if matches!(err, ProviderError::Malformed { .. }) || retries >= self.max_retries {
                warn!(operation, attempts = retries + 1, error = %err, "Provider call failed");
                return Err(err);
            }

            let backoff = self.backoff_for(retries);
            warn!(
                operation,
                retry = retries + 1,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Provider call failed, backing off"
            );
            sleep(backoff).await;
            retries += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1000, 10000)
    }
}
