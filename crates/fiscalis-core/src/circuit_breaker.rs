use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

const LOG_TARGET: &str = "fiscalis::circuit_breaker";

/// Runtime circuit state of one live provider client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive terminal failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing one probe.
    #[serde(with = "duration_ms", rename = "open_timeout_ms")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Thread-safe circuit breaker guarding one provider's network calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    label: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("default", CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            label: label.into(),
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Whether a call may proceed. An open circuit whose timeout has elapsed
    /// moves to half-open and lets the caller through as a probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let can_probe = inner
                    .opened_at
                    .is_some_and(|opened_at| opened_at.elapsed() >= self.config.open_timeout);

                if can_probe {
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_at = None;
                    log::info!(target: LOG_TARGET, "'{}' circuit half-open, probing", self.label);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            log::info!(target: LOG_TARGET, "'{}' circuit closed", self.label);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed
                && inner.consecutive_failures >= self.config.failure_threshold);
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            log::warn!(
                target: LOG_TARGET,
                "'{}' circuit opened after {} consecutive failure(s)",
                self.label,
                inner.consecutive_failures
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Remaining time before an open circuit admits a probe.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(self.config.open_timeout.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        // A panic while holding the lock leaves plain counters behind; keep using them.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(
            "pgfn",
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(10),
            },
        );

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
        assert!(breaker.retry_after().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_to_half_open_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new(
            "cvm",
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_timeout: Duration::from_secs(5),
            },
        );

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_the_circuit() {
        let breaker = CircuitBreaker::new(
            "bacen",
            CircuitBreakerConfig {
                failure_threshold: 3,
                open_timeout: Duration::from_secs(1),
            },
        );
        for _ in 0..3 {
            breaker.record_failure();
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.allow_request());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn config_round_trips_timeout_as_milliseconds() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold":4,"open_timeout_ms":1500}"#)
                .expect("config should parse");

        assert_eq!(config.open_timeout, Duration::from_millis(1500));
        assert_eq!(config.failure_threshold, 4);
    }
}
