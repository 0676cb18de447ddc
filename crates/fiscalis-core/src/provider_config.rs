//! Serde model of a provider catalogue entry.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProviderConfig`] | One external data source and its call budget |
//! | [`EndpointConfig`] | One callable endpoint with optional per-endpoint overrides |
//! | [`AuthDescriptor`] | How credentials are injected into requests |
//! | [`RateLimitBudget`] | Requests per minute / hour / day |
//! | [`RetrySettings`] | Attempt budget and exponential backoff |

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::template::PathTemplate;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::http_client::HttpMethod;
use crate::mapping::MapperKind;
use crate::{Capability, ProviderId, Tier, TransportKind, ValidationError};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;

/// Credential injection strategy, keyed by `type` in catalogue files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthKind {
    None,
    /// Static key sent in the named header.
    ApiKey { header: String },
    /// Static token sent as `Authorization: Bearer`.
    Bearer,
    /// Credential is the username, secret is the password.
    Basic,
    /// Client-credentials grant; the token is fetched out of band and cached.
    #[serde(rename = "oauth2")]
    OAuth2 {
        token_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
    /// Client certificate (PEM credential) and key (PEM secret) for mutual TLS.
    Certificate,
}

impl AuthKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApiKey { .. } => "api_key",
            Self::Bearer => "bearer",
            Self::Basic => "basic",
            Self::OAuth2 { .. } => "oauth2",
            Self::Certificate => "certificate",
        }
    }

    pub const fn requires_credential(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDescriptor {
    pub kind: AuthKind,
    /// On 401/403, refresh credentials once and replay the call once.
    #[serde(default)]
    pub auto_refresh: bool,
}

impl AuthDescriptor {
    pub const fn none() -> Self {
        Self {
            kind: AuthKind::None,
            auto_refresh: false,
        }
    }

    pub fn api_key(header: impl Into<String>) -> Self {
        Self {
            kind: AuthKind::ApiKey {
                header: header.into(),
            },
            auto_refresh: false,
        }
    }

    pub fn oauth2(token_url: impl Into<String>, scope: Option<&str>) -> Self {
        Self {
            kind: AuthKind::OAuth2 {
                token_url: token_url.into(),
                scope: scope.map(String::from),
            },
            auto_refresh: true,
        }
    }

    pub const fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }
}

impl Default for AuthDescriptor {
    fn default() -> Self {
        Self::none()
    }
}

/// Requests allowed per window. `None` leaves a window unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBudget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_day: Option<u32>,
}

/// One limiter window derived from a [`RateLimitBudget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitWindow {
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitBudget {
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            per_minute: Some(max_requests),
            per_hour: None,
            per_day: None,
        }
    }

    pub const fn unlimited() -> Self {
        Self {
            per_minute: None,
            per_hour: None,
            per_day: None,
        }
    }

    pub const fn with_per_hour(mut self, max_requests: u32) -> Self {
        self.per_hour = Some(max_requests);
        self
    }

    pub const fn with_per_day(mut self, max_requests: u32) -> Self {
        self.per_day = Some(max_requests);
        self
    }

    /// Configured windows, shortest first.
    pub fn windows(&self) -> Vec<LimitWindow> {
        [
            ("minute", self.per_minute, Duration::from_secs(60)),
            ("hour", self.per_hour, Duration::from_secs(3_600)),
            ("day", self.per_day, Duration::from_secs(86_400)),
        ]
        .into_iter()
        .filter_map(|(name, max_requests, window)| {
            max_requests.map(|max_requests| LimitWindow {
                name,
                max_requests,
                window,
            })
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

impl RetrySettings {
    pub fn new(max_attempts: u32, initial_delay_ms: u64, multiplier: f64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            multiplier,
            max_delay_ms,
            jitter: false,
        }
    }

    /// Worst-case backoff sleep across all attempts.
    fn total_backoff(&self) -> Duration {
        crate::retry::RetryPolicy::from(self).total_backoff()
    }
}

/// Whether a provider talks to the real upstream or to the deterministic simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    #[default]
    Live,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    /// Path (and query) template appended to the provider base url, e.g. `/devedores/{subject}`.
    pub path: String,
    /// Parameter names the template may reference.
    #[serde(default)]
    pub params: Vec<String>,
    /// Optional request body template; placeholders are substituted verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub capability: Capability,
    /// Whether the aggregation fan-out calls this endpoint for every subject.
    #[serde(default = "default_true")]
    pub collect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

fn default_true() -> bool {
    true
}

impl EndpointConfig {
    pub fn get(id: impl Into<String>, path: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            method: HttpMethod::Get,
            path: path.into(),
            params: vec![String::from("subject")],
            body: None,
            capability,
            collect: !matches!(capability, Capability::Identity | Capability::Health),
            cache_ttl_secs: None,
            retry: None,
            timeout_ms: None,
        }
    }

    pub fn post(
        id: impl Into<String>,
        path: impl Into<String>,
        body: impl Into<String>,
        capability: Capability,
    ) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body.into()),
            ..Self::get(id, path, capability)
        }
    }

    pub fn with_params(mut self, params: &[&str]) -> Self {
        self.params = params.iter().map(|param| String::from(*param)).collect();
        self
    }

    pub const fn with_cache_ttl_secs(mut self, ttl: u64) -> Self {
        self.cache_ttl_secs = Some(ttl);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = Some(retry);
        self
    }

    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub const fn with_collect(mut self, collect: bool) -> Self {
        self.collect = collect;
        self
    }
}

/// Catalogue entry for one external data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub name: String,
    pub tier: Tier,
    pub transport: TransportKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthDescriptor,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitBudget,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower ranks are preferred within a fallback chain.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub mode: ClientMode,
    pub mapper: MapperKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_endpoint: Option<String>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ProviderConfig {
    pub fn new(
        id: ProviderId,
        name: impl Into<String>,
        tier: Tier,
        base_url: impl Into<String>,
        mapper: MapperKind,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            tier,
            transport: TransportKind::DirectApi,
            base_url: base_url.into(),
            auth: AuthDescriptor::none(),
            endpoints: Vec::new(),
            rate_limit: RateLimitBudget::unlimited(),
            retry: RetrySettings::default(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            enabled: true,
            priority: 0,
            mode: ClientMode::Live,
            mapper,
            health_endpoint: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_auth(mut self, auth: AuthDescriptor) -> Self {
        self.auth = auth;
        self
    }

    pub const fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub const fn with_rate_limit(mut self, rate_limit: RateLimitBudget) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub const fn with_cache_ttl_secs(mut self, ttl: u64) -> Self {
        self.cache_ttl_secs = ttl;
        self
    }

    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub const fn with_mode(mut self, mode: ClientMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_health_endpoint(mut self, endpoint_id: impl Into<String>) -> Self {
        self.health_endpoint = Some(endpoint_id.into());
        self
    }

    pub const fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn endpoint(&self, endpoint_id: &str) -> Option<&EndpointConfig> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.id == endpoint_id)
    }

    /// Endpoints the aggregation fan-out calls for every subject.
    pub fn collect_endpoints(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.iter().filter(|endpoint| endpoint.collect)
    }

    pub fn has_collect_endpoints(&self) -> bool {
        self.collect_endpoints().next().is_some()
    }

    /// First endpoint answering `capability`.
    pub fn endpoint_for(&self, capability: Capability) -> Option<&EndpointConfig> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.capability == capability)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.endpoint_for(capability).is_some()
    }

    pub fn retry_for(&self, endpoint: &EndpointConfig) -> RetrySettings {
        endpoint.retry.clone().unwrap_or_else(|| self.retry.clone())
    }

    pub fn timeout_for(&self, endpoint: &EndpointConfig) -> Duration {
        Duration::from_millis(endpoint.timeout_ms.unwrap_or(self.timeout_ms))
    }

    pub fn cache_ttl_for(&self, endpoint: &EndpointConfig) -> Duration {
        Duration::from_secs(endpoint.cache_ttl_secs.unwrap_or(self.cache_ttl_secs))
    }

    /// Upper bound on one endpoint call: every attempt timing out plus all
    /// backoff sleeps, plus one replay after a credential refresh.
    ///
    /// Rate-limit waits are not bounded here; callers that need a hard cap
    /// apply their own deadline.
    pub fn call_budget(&self, endpoint: &EndpointConfig) -> Duration {
        let retry = self.retry_for(endpoint);
        let attempts = retry.max_attempts.max(1) + u32::from(self.auth.auto_refresh);
        self.timeout_for(endpoint)
            .saturating_mul(attempts)
            .saturating_add(retry.total_backoff())
    }

    /// Sum of [`call_budget`](Self::call_budget) over the collect endpoints,
    /// which a provider runs one after another.
    pub fn collection_budget(&self) -> Duration {
        self.collect_endpoints()
            .map(|endpoint| self.call_budget(endpoint))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Limiter keys and caps, `<provider>:minute|hour|day`.
    pub fn limiter_keys(&self) -> Vec<(String, LimitWindow)> {
        self.rate_limit
            .windows()
            .into_iter()
            .map(|window| (format!("{}:{}", self.id, window.name), window))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let provider = self.id.to_string();

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ValidationError::InvalidBaseUrl { provider });
        }
        if self.endpoints.is_empty() {
            return Err(ValidationError::NoEndpoints { provider });
        }

        for (window, max_requests) in [
            ("minute", self.rate_limit.per_minute),
            ("hour", self.rate_limit.per_hour),
            ("day", self.rate_limit.per_day),
        ] {
            if max_requests == Some(0) {
                return Err(ValidationError::ZeroRateLimit {
                    provider: provider.clone(),
                    window,
                });
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ValidationError::ZeroAttempts);
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.id.as_str()) {
                return Err(ValidationError::DuplicateEndpoint {
                    provider: provider.clone(),
                    endpoint: endpoint.id.clone(),
                });
            }
            if endpoint
                .retry
                .as_ref()
                .is_some_and(|retry| retry.max_attempts == 0)
            {
                return Err(ValidationError::ZeroAttempts);
            }

            let mut templates = vec![PathTemplate::parse(&endpoint.path)?];
            if let Some(body) = &endpoint.body {
                templates.push(PathTemplate::parse_lenient(body));
            }
            for template in &templates {
                if let Some(placeholder) = template
                    .placeholders()
                    .find(|name| !endpoint.params.iter().any(|param| param.as_str() == *name))
                {
                    return Err(ValidationError::UndeclaredPlaceholder {
                        endpoint: endpoint.id.clone(),
                        placeholder: placeholder.to_owned(),
                    });
                }
            }
        }

        if let Some(health) = &self.health_endpoint {
            if self.endpoint(health).is_none() {
                return Err(ValidationError::UnknownHealthEndpoint {
                    provider,
                    endpoint: health.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pgfn() -> ProviderConfig {
        ProviderConfig::new(
            ProviderId::parse("pgfn").expect("valid id"),
            "PGFN",
            Tier::Tier1,
            "https://api.pgfn.test",
            MapperKind::Pgfn,
        )
        .with_endpoint(EndpointConfig::get(
            "debts",
            "/devedores/{subject}",
            Capability::DebtRegistry,
        ))
    }

    #[test]
    fn accepts_a_well_formed_provider() {
        assert_eq!(pgfn().validate(), Ok(()));
    }

    #[test]
    fn rejects_placeholder_missing_from_params() {
        let config = pgfn().with_endpoint(EndpointConfig::get(
            "detail",
            "/inscricoes/{numero}",
            Capability::DebtRegistry,
        ));

        assert_eq!(
            config.validate(),
            Err(ValidationError::UndeclaredPlaceholder {
                endpoint: String::from("detail"),
                placeholder: String::from("numero"),
            })
        );
    }

    #[test]
    fn rejects_duplicate_endpoints_and_zero_budgets() {
        let duplicated = pgfn().with_endpoint(EndpointConfig::get(
            "debts",
            "/outra/{subject}",
            Capability::DebtRegistry,
        ));
        assert!(matches!(
            duplicated.validate(),
            Err(ValidationError::DuplicateEndpoint { .. })
        ));

        let zero = pgfn().with_rate_limit(RateLimitBudget::per_minute(0));
        assert!(matches!(
            zero.validate(),
            Err(ValidationError::ZeroRateLimit { window: "minute", .. })
        ));
    }

    #[test]
    fn limiter_keys_follow_configured_windows() {
        let config = pgfn().with_rate_limit(RateLimitBudget::per_minute(60).with_per_day(1_000));
        let keys = config
            .limiter_keys()
            .into_iter()
            .map(|(key, window)| (key, window.max_requests))
            .collect::<Vec<_>>();

        assert_eq!(
            keys,
            vec![
                (String::from("pgfn:minute"), 60),
                (String::from("pgfn:day"), 1_000)
            ]
        );
    }

    #[test]
    fn endpoint_overrides_take_precedence() {
        let config = pgfn()
            .with_timeout_ms(5_000)
            .with_cache_ttl_secs(60)
            .with_endpoint(
                EndpointConfig::get("slow", "/lento/{subject}", Capability::DebtRegistry)
                    .with_timeout_ms(20_000)
                    .with_cache_ttl_secs(5),
            );
        let slow = config.endpoint("slow").expect("declared");
        let debts = config.endpoint("debts").expect("declared");

        assert_eq!(config.timeout_for(slow), Duration::from_secs(20));
        assert_eq!(config.timeout_for(debts), Duration::from_secs(5));
        assert_eq!(config.cache_ttl_for(slow), Duration::from_secs(5));
        assert_eq!(config.cache_ttl_for(debts), Duration::from_secs(60));
    }

    #[test]
    fn call_budget_covers_every_attempt_and_backoff() {
        let config = pgfn()
            .with_timeout_ms(1_000)
            .with_retry(RetrySettings::new(3, 100, 2.0, 10_000));
        let debts = config.endpoint("debts").expect("declared");

        // 3 x 1s timeouts + 100ms + 200ms backoff.
        assert_eq!(config.call_budget(debts), Duration::from_millis(3_300));
    }

    #[test]
    fn auth_kind_uses_type_tag() {
        let auth: AuthDescriptor = serde_json::from_str(
            r#"{"kind":{"type":"oauth2","token_url":"https://auth.test/token"},"auto_refresh":true}"#,
        )
        .expect("descriptor should parse");

        assert_eq!(auth.kind.as_str(), "oauth2");
        assert!(auth.auto_refresh);
    }
}
