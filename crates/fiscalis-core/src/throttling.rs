//! Per-key request budgets.
//!
//! [`RateLimiter::acquire_all`] suspends the caller until every window of a
//! budget has room, then accounts exactly one request in each of them. Callers
//! acquire once per network attempt; cache hits never reach the limiter.
//!
//! Time spent waiting for a slot is backpressure, not slowness. Run work under
//! [`within_work_budget`] to bound it by a deadline that does not count those
//! waits.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as GovernorLimiter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::provider_config::LimitWindow;

const LOG_TARGET: &str = "fiscalis::throttling";

type DirectRateLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

tokio::task_local! {
    static THROTTLE_WAIT_US: Arc<AtomicU64>;
}

/// Window accounting strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Fixed-window counter. The counter resets once the window elapses, so
    /// up to twice the cap can pass around a window boundary.
    Fixed,
    /// Timestamp log: at most `max_requests` in any `window`-long interval.
    #[default]
    Sliding,
    /// GCRA pacing with burst 1 at the tightest window's rate, one request
    /// every `window / max_requests`.
    Paced,
}

#[derive(Debug)]
enum WindowState {
    Fixed { count: u32, reset_at: Instant },
    Sliding { granted: VecDeque<Instant> },
}

impl WindowState {
    fn empty(policy: WindowPolicy, now: Instant, window: Duration) -> Self {
        match policy {
            WindowPolicy::Fixed => Self::Fixed {
                count: 0,
                reset_at: now + window,
            },
            WindowPolicy::Sliding | WindowPolicy::Paced => Self::Sliding {
                granted: VecDeque::new(),
            },
        }
    }

    /// Drops whatever fell out of the window.
    fn expire(&mut self, now: Instant, window: Duration) {
        match self {
            Self::Fixed { count, reset_at } => {
                if now >= *reset_at {
                    *count = 0;
                    *reset_at = now + window;
                }
            }
            Self::Sliding { granted } => {
                while granted
                    .front()
                    .is_some_and(|stamp| now.saturating_duration_since(*stamp) >= window)
                {
                    let _ = granted.pop_front();
                }
            }
        }
    }

    /// `None` when a slot is free, otherwise how long until one opens.
    fn wait_for_slot(&self, now: Instant, max_requests: u32, window: Duration) -> Option<Duration> {
        match self {
            Self::Fixed { count, reset_at } => {
                (*count >= max_requests).then(|| reset_at.saturating_duration_since(now))
            }
            Self::Sliding { granted } => (granted.len() >= max_requests as usize).then(|| {
                granted
                    .front()
                    .map_or(Duration::ZERO, |oldest| {
                        (*oldest + window).saturating_duration_since(now)
                    })
            }),
        }
    }

    fn take(&mut self, now: Instant) {
        match self {
            Self::Fixed { count, .. } => *count += 1,
            Self::Sliding { granted } => granted.push_back(now),
        }
    }
}

/// Snapshot of one key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub in_window: u32,
    pub total_granted: u64,
}

/// A slot would not open within the limiter's wait bound. Nothing was taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{key}' budget exhausted for another {}ms", .wait.as_millis())]
pub struct Throttled {
    pub key: String,
    pub wait: Duration,
}

/// Process-wide request budget enforcement, safe to share across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    policy: WindowPolicy,
    max_wait: Option<Duration>,
    windows: Mutex<HashMap<String, WindowState>>,
    paced: Mutex<HashMap<String, Arc<DirectRateLimiter>>>,
    granted: Mutex<HashMap<String, u64>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WindowPolicy::default())
    }
}

impl RateLimiter {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            max_wait: None,
            windows: Mutex::new(HashMap::new()),
            paced: Mutex::new(HashMap::new()),
            granted: Mutex::new(HashMap::new()),
        }
    }

    /// Longest a caller may be suspended for one acquisition. `None` waits
    /// for as long as the windows require.
    pub const fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub const fn policy(&self) -> WindowPolicy {
        self.policy
    }

    pub const fn max_wait(&self) -> Option<Duration> {
        self.max_wait
    }

    /// Single-window [`acquire_all`](Self::acquire_all) that ignores the wait
    /// bound. Returns how long the caller was suspended.
    pub async fn acquire(&self, key: &str, max_requests: u32, window: Duration) -> Duration {
        let budget = [(
            key.to_owned(),
            LimitWindow {
                name: "window",
                max_requests,
                window,
            },
        )];
        let started = Instant::now();
        match self.acquire_within(&budget, None).await {
            Ok(waited) => waited,
            Err(_) => started.elapsed(),
        }
    }

    /// Waits until every window in `budget` has room, then accounts one
    /// request in each. Returns how long the caller was suspended.
    ///
    /// Slots are taken together or not at all: a caller blocked on one
    /// window, or cancelled while waiting, holds none of the others.
    ///
    /// # Errors
    ///
    /// [`Throttled`] when the slots would not open within the configured
    /// wait bound. The caller is not suspended in that case.
    pub async fn acquire_all(&self, budget: &[(String, LimitWindow)]) -> Result<Duration, Throttled> {
        self.acquire_within(budget, self.max_wait).await
    }

    async fn acquire_within(
        &self,
        budget: &[(String, LimitWindow)],
        max_wait: Option<Duration>,
    ) -> Result<Duration, Throttled> {
        let started = Instant::now();
        if budget.is_empty() {
            return Ok(Duration::ZERO);
        }

        match self.policy {
            WindowPolicy::Paced => self.pace(budget, started, max_wait).await?,
            WindowPolicy::Fixed | WindowPolicy::Sliding => loop {
                let Some((key, wait)) = self.try_take_all(budget) else {
                    break;
                };
                check_bound(&key, wait, started, max_wait)?;
                log::debug!(
                    target: LOG_TARGET,
                    "'{key}' at capacity; waiting {}ms",
                    wait.as_millis()
                );
                record_throttle_wait(wait);
                tokio::time::sleep(wait).await;
            },
        }

        let mut granted = lock(&self.granted);
        for (key, _) in budget {
            *granted.entry(key.clone()).or_insert(0) += 1;
        }
        Ok(started.elapsed())
    }

    /// Whether a request for `key` would currently pass without waiting.
    ///
    /// Paced keys always report `true`: GCRA state cannot be inspected without
    /// consuming a cell.
    pub fn has_capacity(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        let now = Instant::now();
        let windows = lock(&self.windows);
        match windows.get(key) {
            None => true,
            Some(WindowState::Fixed { count, reset_at }) => {
                now >= *reset_at || *count < max_requests.max(1)
            }
            Some(WindowState::Sliding { granted }) => {
                let live = granted
                    .iter()
                    .filter(|stamp| now.saturating_duration_since(**stamp) < window)
                    .count();
                live < max_requests.max(1) as usize
            }
        }
    }

    pub fn usage(&self, key: &str) -> WindowUsage {
        let now = Instant::now();
        let in_window = match lock(&self.windows).get(key) {
            None => 0,
            Some(WindowState::Fixed { count, reset_at }) => {
                if now >= *reset_at {
                    0
                } else {
                    *count
                }
            }
            Some(WindowState::Sliding { granted }) => {
                u32::try_from(granted.len()).unwrap_or(u32::MAX)
            }
        };
        WindowUsage {
            in_window,
            total_granted: lock(&self.granted).get(key).copied().unwrap_or(0),
        }
    }

    /// Takes a slot in every window if all have one free. Otherwise takes
    /// nothing and returns the key that blocks longest with its wait.
    fn try_take_all(&self, budget: &[(String, LimitWindow)]) -> Option<(String, Duration)> {
        let now = Instant::now();
        let mut windows = lock(&self.windows);

        let mut blocked: Option<(&str, Duration)> = None;
        for (key, limit) in budget {
            let state = windows
                .entry(key.clone())
                .or_insert_with(|| WindowState::empty(self.policy, now, limit.window));
            state.expire(now, limit.window);
            if let Some(wait) = state.wait_for_slot(now, limit.max_requests.max(1), limit.window) {
                if blocked.map_or(true, |(_, longest)| wait > longest) {
                    blocked = Some((key.as_str(), wait));
                }
            }
        }
        if let Some((key, wait)) = blocked {
            return Some((key.to_owned(), wait));
        }

        for (key, _) in budget {
            if let Some(state) = windows.get_mut(key) {
                state.take(now);
            }
        }
        None
    }

    /// Paces on the tightest window. At one request per `window / max`
    /// every looser window stays within its cap as well.
    async fn pace(
        &self,
        budget: &[(String, LimitWindow)],
        started: Instant,
        max_wait: Option<Duration>,
    ) -> Result<(), Throttled> {
        let Some((key, limit)) = budget.iter().min_by(|(_, a), (_, b)| {
            pace_period(a).cmp(&pace_period(b))
        }) else {
            return Ok(());
        };
        let limiter = self.paced_limiter(key, limit.max_requests.max(1), limit.window);

        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            check_bound(key, wait, started, max_wait)?;
            record_throttle_wait(wait);
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    fn paced_limiter(&self, key: &str, max_requests: u32, window: Duration) -> Arc<DirectRateLimiter> {
        let mut paced = lock(&self.paced);
        Arc::clone(
            paced
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(GovernorLimiter::direct(paced_quota(window, max_requests)))),
        )
    }
}

/// Runs `future` under a deadline of `budget` that is pushed back by every
/// rate-limit wait the future sits through. `None` when the deadline passes.
pub async fn within_work_budget<F: Future>(budget: Duration, future: F) -> Option<F::Output> {
    let throttled = Arc::new(AtomicU64::new(0));
    let future = THROTTLE_WAIT_US.scope(Arc::clone(&throttled), future);
    tokio::pin!(future);

    let started = Instant::now();
    let deadline = || {
        let waited = Duration::from_micros(throttled.load(Ordering::SeqCst));
        started.checked_add(budget.saturating_add(waited))
    };
    loop {
        let Some(deadline_at) = deadline() else {
            return Some((&mut future).await);
        };
        tokio::select! {
            output = &mut future => return Some(output),
            () = tokio::time::sleep_until(deadline_at) => {
                if deadline().is_some_and(|deadline_at| Instant::now() >= deadline_at) {
                    return None;
                }
            }
        }
    }
}

/// Credits `wait` to the enclosing [`within_work_budget`], if any.
fn record_throttle_wait(wait: Duration) {
    let micros = u64::try_from(wait.as_micros()).unwrap_or(u64::MAX);
    let _ = THROTTLE_WAIT_US.try_with(|throttled| {
        let _ = throttled.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
            Some(total.saturating_add(micros))
        });
    });
}

fn check_bound(
    key: &str,
    wait: Duration,
    started: Instant,
    max_wait: Option<Duration>,
) -> Result<(), Throttled> {
    match max_wait {
        Some(max_wait) if started.elapsed() + wait > max_wait => {
            log::debug!(
                target: LOG_TARGET,
                "'{key}' would block {}ms, over the {}ms bound",
                wait.as_millis(),
                max_wait.as_millis()
            );
            Err(Throttled {
                key: key.to_owned(),
                wait,
            })
        }
        _ => Ok(()),
    }
}

fn pace_period(limit: &LimitWindow) -> Duration {
    limit.window / limit.max_requests.max(1)
}

/// One cell every `window / max_requests`, no burst.
fn paced_quota(window: Duration, max_requests: u32) -> Quota {
    let safe_limit = max_requests.max(1);
    let seconds_per_cell = (window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN)
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Counters stay usable after a poisoned lock; the worst case is one
/// mis-accounted request.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!(target: LOG_TARGET, "rate limiter mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}
