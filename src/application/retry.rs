use crate::domain::payment_result::PaymentResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Governs how often, and how patiently, a provider call is attempted.
///
/// Only [`Transient`](crate::domain::payment_result::FailureKind::Transient)
/// failures are retried. A call that outlives `call_timeout` counts as a
/// transient failure; the call itself is dropped, not awaited further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `call` until it returns something other than a transient failure
    /// or attempts run out. The last result is returned either way.
    pub async fn run<F, Fut>(&self, operation: &str, mut call: F) -> PaymentResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PaymentResult>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => PaymentResult::transient(format!(
                    "{} timed out after {}ms",
                    operation,
                    self.call_timeout.as_millis()
                )),
            };

            if !result.is_transient_failure() {
                return result;
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    operation,
                    attempts = attempt,
                    error = result.error_message().unwrap_or_default(),
                    "Giving up after transient failures"
                );
                return result;
            }

            let delay = self.backoff(attempt);
            tracing::warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = result.error_message().unwrap_or_default(),
                "Transient provider failure, retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
