//! Retry policy shared by the lock acquisition and cache invalidation sites.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(retry - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

impl Backoff {
    pub fn from_kind(kind: BackoffKind, base: Duration, max: Duration) -> Self {
        match kind {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential { base, max },
        }
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = retry.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

/// Bounded attempt budget plus a delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

/// Outcome of a policy run that never succeeded.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// One try followed by `retries` immediate retries.
    pub fn immediate(retries: u32) -> Self {
        Self::new(retries.saturating_add(1), Backoff::None)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delays slept between consecutive attempts, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|retry| self.backoff.delay(retry))
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `on_failure` observes every failed attempt with its 1-based number.
    pub async fn run<T, E, F, Fut>(
        &self,
        op: F,
        on_failure: impl FnMut(u32, &E),
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_when(op, |_| true, on_failure).await
    }

    /// Like [`RetryPolicy::run`], but stops early on errors `retryable` rejects.
    pub async fn run_when<T, E, F, Fut>(
        &self,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
        mut on_failure: impl FnMut(u32, &E),
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    on_failure(attempt, &err);
                    if attempt >= self.max_attempts || !retryable(&err) {
                        return Err(Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    let delay = self.backoff.delay(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(1),
            max: Duration::from_millis(6),
        };
        let delays: Vec<_> = (1..=5).map(|retry| backoff.delay(retry)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(6),
                Duration::from_millis(6),
            ]
        );
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let policy = RetryPolicy::new(4, Backoff::Fixed(Duration::from_millis(3)));
        assert!(policy.schedule().all(|d| d == Duration::from_millis(3)));
        assert_eq!(policy.schedule().count(), 3);
    }

    #[test]
    fn huge_retry_numbers_saturate_at_max() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        };
        assert_eq!(backoff.delay(200), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn immediate_policy_makes_one_plus_retries_attempts() {
        let calls = AtomicU32::new(0);
        let mut observed = Vec::new();
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("down") }
                },
                |attempt, _| observed.push(attempt),
            )
            .await;

        let exhausted = result.expect_err("always failing op");
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(exhausted.last_error, "down");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(observed, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let value = RetryPolicy::immediate(3)
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move { if n < 1 { Err("flaky") } else { Ok(n) } }
                },
                |_, _| {},
            )
            .await
            .expect("second attempt succeeds");
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run_when(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("fatal") }
                },
                |err: &&str| *err != "fatal",
                |_, _| {},
            )
            .await;
        assert_eq!(result.expect_err("fails").attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
