//! Bounded-attempt, fixed-delay retry.

use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single attempt with no delay.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Retry budget exhausted. Carries the final failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "after {} attempts, last error: {}",
            self.attempts, self.last
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl<E> RetryError<E> {
    pub fn into_last(self) -> E {
        self.last
    }
}

/// Call `op` until it succeeds or `policy.attempts` calls have failed,
/// sleeping `policy.delay` between calls. At least one call is made.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                return Err(RetryError { attempts, last: e });
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Attempt failed, retrying"
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
