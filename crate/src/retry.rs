//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(
        max_attempts: u32,
        multiplier: Duration,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            multiplier,
            min_delay,
            max_delay,
        }
    }

    /// Wait before the next attempt once `failures` attempts have failed:
    /// `multiplier * 2^(failures - 1)` clamped to `[min_delay, max_delay]`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.multiplier
            .saturating_mul(factor)
            .clamp(self.min_delay, self.max_delay)
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or `max_attempts` attempts have been made. The last error is returned.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &str,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retryable = is_retryable(&err);
                    if !retryable {
                        tracing::error!(
                            error = %err,
                            operation,
                            attempts,
                            retryable,
                            "Operation failed with a non-retryable error"
                        );
                        return Err(err);
                    }
                    if attempts >= self.max_attempts {
                        tracing::error!(
                            error = %err,
                            operation,
                            attempts,
                            retryable,
                            "Retry budget exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.delay_after(attempts);
                    tracing::warn!(
                        error = %err,
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tracing_test::traced_test;

    const FAST: RetryPolicy = RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(1),
        Duration::from_millis(4),
    );

    #[test]
    fn session_schedule_is_clamped_to_bounds() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(30),
        );
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay_after(n).as_secs()).collect();
        assert_eq!(delays, vec![4, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn storage_schedule_never_exceeds_cap() {
        let policy = RetryPolicy::new(
            3,
            Duration::from_secs(1),
            Duration::from_secs(4),
            Duration::from_secs(10),
        );
        assert_eq!(policy.delay_after(1), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = FAST
            .run("flaky", |_: &&str| true, || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = FAST
            .run("down", |_: &&str| true, || {
                calls.set(calls.get() + 1);
                async { Err("persistent") }
            })
            .await;
        assert_eq!(result, Err("persistent"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn exhausted_budget_is_logged_as_such() {
        let result: Result<(), &str> = FAST
            .run("down", |_: &&str| true, || async { Err("persistent") })
            .await;

        assert!(result.is_err());
        assert!(logs_contain("Retry budget exhausted"));
        assert!(logs_contain("retryable=true"));
        assert!(!logs_contain("non-retryable"));
    }

    #[tokio::test]
    #[traced_test]
    async fn non_retryable_error_is_logged_apart_from_exhaustion() {
        let result: Result<(), &str> = FAST
            .run("rejected", |_: &&str| false, || async { Err("bad request") })
            .await;

        assert!(result.is_err());
        assert!(logs_contain("Operation failed with a non-retryable error"));
        assert!(logs_contain("retryable=false"));
        assert!(!logs_contain("Retry budget exhausted"));
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = FAST
            .run("rejected", |_: &&str| false, || {
                calls.set(calls.get() + 1);
                async { Err("bad request") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
