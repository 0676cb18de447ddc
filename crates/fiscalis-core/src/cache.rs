//! In-memory TTL cache shared by every provider client.
//!
//! Entries are keyed by a caller-chosen logical key rather than the request
//! URL, so redundant providers answering the same question can share a slot.
//! Time is read from `tokio::time::Instant`, which lets paused-clock tests
//! drive expiry deterministically.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

const LOG_TARGET: &str = "fiscalis::cache";

/// Per-call cache behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve an unexpired entry, otherwise compute and store. (Default)
    #[default]
    Use,
    /// Always compute, then overwrite the entry.
    Refresh,
    /// Always compute and leave the cache untouched.
    Bypass,
}

/// Whether a lookup was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// An entry is served for `now < created_at + ttl` only.
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
}

/// Thread-safe TTL cache. Cloning shares the underlying store.
#[derive(Debug)]
pub struct CacheStore<V> {
    inner: Arc<RwLock<CacheInner<V>>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                map: HashMap::new(),
                default_ttl,
            })),
        }
    }

    /// A cache with a 5 minute default TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(300))
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn default_ttl(&self) -> Duration {
        self.inner.read().await.default_ttl
    }

    pub async fn is_disabled(&self) -> bool {
        self.default_ttl().await == Duration::ZERO
    }

    /// Returns an unexpired value, evicting the entry if it has expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let store = self.inner.read().await;
            match store.map.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut store = self.inner.write().await;
        let expired = store
            .map
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()));
        if expired {
            let _ = store.map.remove(key);
            log::debug!(target: LOG_TARGET, "evicted expired entry '{key}'");
        }
        None
    }

    /// Stores a value. `ttl` falls back to the default TTL; a zero TTL stores nothing.
    pub async fn put(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let mut store = self.inner.write().await;
        if store.default_ttl == Duration::ZERO {
            return;
        }

        let ttl = ttl.unwrap_or(store.default_ttl);
        if ttl == Duration::ZERO {
            return;
        }

        let _ = store.map.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Returns the cached value for `key`, or runs `producer` and caches its success.
    ///
    /// Concurrent misses on one key may each run their producer; the last
    /// writer wins. A failed producer leaves the cache untouched.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.get_or_compute_with_mode(CacheMode::Use, key, ttl, producer)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute) but honours a [`CacheMode`]
    /// and reports whether the value came from the cache.
    pub async fn get_or_compute_with_mode<F, Fut, E>(
        &self,
        mode: CacheMode,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<(V, CacheOutcome), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if mode == CacheMode::Use {
            if let Some(value) = self.get(key).await {
                log::debug!(target: LOG_TARGET, "hit '{key}'");
                return Ok((value, CacheOutcome::Hit));
            }
        }

        let value = producer().await?;
        if mode != CacheMode::Bypass {
            self.put(key, value.clone(), ttl).await;
        }
        Ok((value, CacheOutcome::Miss))
    }

    /// Removes every entry, or only those whose key contains `pattern`.
    /// Returns the number of removed entries.
    pub async fn clear(&self, pattern: Option<&str>) -> usize {
        let mut store = self.inner.write().await;
        let before = store.map.len();
        match pattern {
            None => store.map.clear(),
            Some(pattern) => store.map.retain(|key, _| !key.contains(pattern)),
        }
        before - store.map.len()
    }

    pub async fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut store = self.inner.write().await;
        let before = store.map.len();
        store.map.retain(|_, entry| !entry.is_expired(now));
        before - store.map.len()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
