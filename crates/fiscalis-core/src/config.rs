//! Engine-wide settings for [`Aggregator`](crate::Aggregator).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;
use crate::throttling::WindowPolicy;
use crate::Capability;

/// Defaults used by batch runs when the caller does not override them.
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_secs(2);
/// Covers any per-minute window; hour and day caps fail fast instead.
pub const DEFAULT_MAX_THROTTLE_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Force every provider onto the simulated client.
    pub simulated: bool,
    /// Per-provider timeout for one subject. Unset uses each provider's own budget.
    #[serde(with = "optional_ms", rename = "provider_timeout_ms")]
    pub provider_timeout: Option<Duration>,
    /// Capability used to resolve a subject's display name.
    pub identity_capability: Capability,
    /// TTL for cache entries stored without an explicit TTL.
    #[serde(with = "duration_secs", rename = "cache_default_ttl_secs")]
    pub cache_default_ttl: Duration,
    pub cache_mode: CacheMode,
    pub window_policy: WindowPolicy,
    /// Longest one call may wait for a rate-limit slot before failing as
    /// rate limited. Unset waits for as long as the windows require.
    #[serde(with = "optional_ms", rename = "max_throttle_wait_ms")]
    pub max_throttle_wait: Option<Duration>,
    pub event_capacity: usize,
    /// Artificial latency of simulated calls.
    #[serde(with = "duration_ms", rename = "simulated_latency_ms")]
    pub simulated_latency: Duration,
    pub batch_size: usize,
    #[serde(with = "duration_ms", rename = "inter_batch_delay_ms")]
    pub inter_batch_delay: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            simulated: false,
            provider_timeout: None,
            identity_capability: Capability::Identity,
            cache_default_ttl: Duration::from_secs(300),
            cache_mode: CacheMode::Use,
            window_policy: WindowPolicy::Sliding,
            max_throttle_wait: Some(DEFAULT_MAX_THROTTLE_WAIT),
            event_capacity: 256,
            simulated_latency: Duration::ZERO,
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
        }
    }
}

impl AggregatorConfig {
    /// Every provider simulated, with a small latency so events interleave.
    pub fn simulated() -> Self {
        Self {
            simulated: true,
            simulated_latency: Duration::from_millis(25),
            ..Self::default()
        }
    }

    pub const fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    pub const fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub const fn with_window_policy(mut self, policy: WindowPolicy) -> Self {
        self.window_policy = policy;
        self
    }

    pub const fn with_max_throttle_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_throttle_wait = max_wait;
        self
    }

    pub const fn with_simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = latency;
        self
    }

    pub const fn with_batching(mut self, batch_size: usize, inter_batch_delay: Duration) -> Self {
        self.batch_size = batch_size;
        self.inter_batch_delay = inter_batch_delay;
        self
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

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod optional_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{"simulated":true,"provider_timeout_ms":1500,"window_policy":"paced"}"#)
                .expect("config parses");

        assert!(config.simulated);
        assert_eq!(config.provider_timeout, Some(Duration::from_millis(1_500)));
        assert_eq!(config.window_policy, WindowPolicy::Paced);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.cache_default_ttl, Duration::from_secs(300));
    }

    #[test]
    fn serialized_form_uses_unit_suffixed_keys() {
        let json = serde_json::to_value(AggregatorConfig::simulated()).expect("serializes");

        assert_eq!(json["simulated_latency_ms"], 25);
        assert_eq!(json["inter_batch_delay_ms"], 2_000);
        assert!(json["provider_timeout_ms"].is_null());
    }
}
