//! Explicit retry policy with exponential backoff.
//!
//! [`attempt`] takes the operation, the policy and a retryable predicate as
//! plain values, so callers decide per error whether another try is worth it.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Exponential backoff between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second try.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// No waiting between tries.
    pub fn none() -> Self {
        Self { base: Duration::ZERO, max: Duration::ZERO }
    }

    /// Delay to wait before try number `try_number` (1-based).
    ///
    /// The first try never waits; try *n* waits `base * 2^(n-2)`, capped at `max`.
    pub fn delay_before(&self, try_number: u32) -> Duration {
        if try_number <= 1 {
            return Duration::ZERO;
        }
        let exponent = (try_number - 2).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max: Duration::from_secs(8) }
    }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }
}

/// The error from the final try, with how many tries were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub error: E,
    pub tries: u32,
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's tries are used up.
///
/// `op` receives the 1-based try number.
pub async fn attempt<T, E, F, Fut, P>(policy: &RetryPolicy, mut op: F, is_retryable: P) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut try_number = 1;

    loop {
        let delay = policy.backoff.delay_before(try_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match op(try_number).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if try_number >= max_attempts || !is_retryable(&error) {
                    return Err(Exhausted { error, tries: try_number });
                }
                debug!(try_number, max_attempts, "Retryable failure; backing off");
                try_number += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delays() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.delay_before(1), Duration::ZERO);
        assert_eq!(backoff.delay_before(2), Duration::from_millis(100));
        assert_eq!(backoff.delay_before(3), Duration::from_millis(200));
        assert_eq!(backoff.delay_before(4), Duration::from_millis(350));
        assert_eq!(backoff.delay_before(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_attempt_succeeds_after_retryable_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Backoff::none());

        let result: Result<&str, Exhausted<&str>> = attempt(
            &policy,
            |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 3 { Err("503") } else { Ok("body") } }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok("body"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Backoff::none());

        let result: Result<(), Exhausted<u16>> = attempt(
            &policy,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(404u16) }
            },
            |status| *status >= 500,
        )
        .await;

        assert_eq!(result, Err(Exhausted { error: 404, tries: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_exhausts() {
        let policy = RetryPolicy::new(2, Backoff::none());
        let result: Result<(), Exhausted<u16>> = attempt(&policy, |_| async { Err(500u16) }, |_| true).await;
        assert_eq!(result, Err(Exhausted { error: 500, tries: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_waits_between_tries() {
        let policy = RetryPolicy::new(3, Backoff::new(Duration::from_secs(1), Duration::from_secs(8)));
        let started = tokio::time::Instant::now();
        let _: Result<(), Exhausted<()>> = attempt(&policy, |_| async { Err(()) }, |_| true).await;
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }
}
