//! Retry logic with exponential backoff and optional jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::provider_config::RetrySettings;

const LOG_TARGET: &str = "fiscalis::retry";

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between attempts.
    Fixed {
        delay: Duration,
    },
    /// Delay is `base * factor^retry`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the capped delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay before the `retry`-th retry (0-based: `0` is the wait before attempt 2).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped = if seconds.is_finite() {
                    seconds.min(max.as_secs_f64())
                } else {
                    max.as_secs_f64()
                };
                let delay = Duration::from_secs_f64(capped.max(0.0));

                if jitter {
                    apply_jitter(delay)
                } else {
                    delay
                }
            }
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let spread = millis / 2;
    let offset = fastrand::u64(0..=spread.saturating_mul(2));
    Duration::from_millis((millis - spread).saturating_add(offset))
}

/// Classification an error must expose to be retried.
pub trait RetryableError: Sized {
    /// Timeouts, connection resets, upstream 5xx and 429.
    fn is_transient(&self) -> bool;

    /// Tags the error as the terminal outcome after `attempts` attempts.
    fn into_terminal(self, attempts: u32) -> Self;
}

/// Attempt budget plus backoff for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never below 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(settings.initial_delay_ms),
                factor: settings.multiplier,
                max: Duration::from_millis(settings.max_delay_ms),
                jitter: settings.jitter,
            },
        }
    }
}

impl RetryPolicy {
    pub fn exponential(
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                base: initial_delay,
                factor: multiplier,
                max: max_delay,
                jitter: false,
            },
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before attempt `attempt` (1-based). The first attempt never waits.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            Duration::ZERO
        } else {
            self.backoff.delay(attempt - 2)
        }
    }

    /// Upper bound of the total backoff sleep across all attempts.
    pub fn total_backoff(&self) -> Duration {
        let (backoff, scale) = match self.backoff {
            Backoff::Exponential {
                base,
                factor,
                max,
                jitter: true,
            } => (
                Backoff::Exponential {
                    base,
                    factor,
                    max,
                    jitter: false,
                },
                1.5,
            ),
            other => (other, 1.0),
        };

        (0..self.max_attempts.max(1) - 1)
            .map(|retry| backoff.delay(retry).mul_f64(scale))
            .sum()
    }

    /// Runs `operation` until it succeeds, fails non-transiently, or the budget is spent.
    ///
    /// `operation` receives the 1-based attempt number. The returned error is
    /// always passed through [`RetryableError::into_terminal`].
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => {
                    log::debug!(target: LOG_TARGET, "{label}: non-transient failure on attempt {attempt}: {error}");
                    return Err(error.into_terminal(attempt));
                }
                Err(error) if attempt >= max_attempts => {
                    log::warn!(target: LOG_TARGET, "{label}: giving up after {attempt} attempt(s): {error}");
                    return Err(error.into_terminal(attempt));
                }
                Err(error) => {
                    let delay = self.delay_before_attempt(attempt + 1);
                    log::info!(
                        target: LOG_TARGET,
                        "{label}: attempt {attempt}/{max_attempts} failed ({error}); retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct TestError {
        transient: bool,
        attempts: Option<u32>,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(if self.transient { "transient" } else { "fatal" })
        }
    }

    impl RetryableError for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }

        fn into_terminal(self, attempts: u32) -> Self {
            Self {
                attempts: Some(attempts),
                ..self
            }
        }
    }

    fn transient() -> TestError {
        TestError {
            transient: true,
            attempts: None,
        }
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn delay_before_attempt_follows_initial_times_multiplier_power() {
        let policy = RetryPolicy::exponential(
            6,
            Duration::from_millis(100),
            3.0,
            Duration::from_secs(2),
        );

        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(300));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(900));
        assert_eq!(policy.delay_before_attempt(5), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_half_of_the_capped_delay() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..10 {
            for retry in 0..5 {
                let expected = (100.0 * 2_f64.powi(retry as i32)).min(1000.0);
                let delay_ms = backoff.delay(retry).as_millis() as f64;
                assert!(delay_ms >= expected * 0.49, "retry={retry}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected * 1.51, "retry={retry}, delay_ms={delay_ms}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanently_transient_failure_is_attempted_exactly_max_times() {
        let policy = RetryPolicy::exponential(
            4,
            Duration::from_millis(50),
            2.0,
            Duration::from_secs(1),
        );
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.expect_err("must fail").attempts, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_is_attempted_once() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(50),
            2.0,
            Duration::from_secs(1),
        );
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(TestError {
                        transient: false,
                        attempts: None,
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.expect_err("must fail").attempts, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_later_attempt_succeeds() {
        let policy = RetryPolicy::exponential(
            3,
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
        );
        let started = tokio::time::Instant::now();

        let result = policy
            .run("test", |attempt| async move {
                if attempt < 3 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        // 100ms before attempt 2, 200ms before attempt 3.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }
}
