use std::future::Future;
use std::time::Duration;

use crate::clock::{Clock, ShutdownSignal};
use crate::error::{ChargerError, Result};

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2×base, 4×base … capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Run `operation` until it succeeds, fails terminally, or attempts run out.
///
/// `operation` receives the 1-based attempt number. Backoff sleeps race the
/// shutdown signal; an interrupted sleep ends the loop with `Shutdown`.
pub async fn with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    shutdown: &ShutdownSignal,
    retryable: P,
    operation: F,
) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&ChargerError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && retryable(&err) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    "attempt {}/{} failed ({}); retrying in {:?}",
                    attempt,
                    max_attempts,
                    err,
                    delay
                );
                if !shutdown.sleep(clock, delay).await {
                    return Err(ChargerError::Shutdown);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
