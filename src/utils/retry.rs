use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Retry with capped exponential backoff. The same policy is shared by the
/// worker (provider init / job submission) and the client (request
/// submission); only the parameters differ per call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Backoff for a 1-based attempt number: base doubling per attempt,
    /// capped at max_delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `f` until it succeeds, the error is not retryable, or the attempt
    /// ceiling is reached. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut, R>(&self, operation: &str, mut f: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || !retryable(&e) {
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        operation, attempt, self.max_attempts, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
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
