//! Parallel aggregation engine.
//!
//! [`Aggregator`] owns the registry, one client per registered provider, the
//! shared cache and rate limiter, the correlator and the progress channel.
//! For one subject it resolves the display name through the identity
//! fallback chain, fans out to every enabled provider concurrently and
//! correlates whatever succeeded.
//!
//! Each provider attempt is isolated: errors, panics and timeouts become a
//! failed [`CollectionResult`] and never affect sibling providers.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::adapters::{HttpProviderClient, SimulatedProvider};
use crate::auth::{CredentialSource, EnvCredentialSource};
use crate::batch::{self, BatchSummary};
use crate::cache::CacheStore;
use crate::catalog::Catalog;
use crate::config::AggregatorConfig;
use crate::correlator::Correlator;
use crate::data_source::{
    CallRequest, CallResponse, HealthState, HealthStatus, ProviderClient, SourceError,
};
use crate::events::{EventBus, ProgressEvent};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::mapping;
use crate::provider_config::{AuthKind, ClientMode, ProviderConfig};
use crate::registry::{ProviderFilter, SourceRegistry};
use crate::routing::{FallbackResult, SourceRouter, SourceStrategy};
use crate::store::RecordStore;
use crate::throttling::{within_work_budget, RateLimiter};
use crate::{Capability, CollectionResult, ProviderId, SubjectAggregate, SubjectId, Tier, ValidationError};

const LOG_TARGET: &str = "fiscalis::aggregation";

/// Health of one registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub provider: ProviderId,
    pub name: String,
    pub tier: Tier,
    pub enabled: bool,
    pub healthy: bool,
    pub state: HealthState,
    pub rate_available: bool,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    fn new(config: &ProviderConfig, status: HealthStatus) -> Self {
        Self {
            provider: config.id.clone(),
            name: config.name.clone(),
            tier: config.tier,
            enabled: config.enabled,
            healthy: config.enabled && status.is_healthy(),
            state: status.state,
            rate_available: status.rate_available,
            response_time_ms: status.response_time_ms,
            detail: status.detail,
        }
    }
}

/// Builder for [`Aggregator`].
///
/// The registry is populated first; clients are then built once per
/// registered provider unless one was supplied with [`with_client`](Self::with_client).
pub struct AggregatorBuilder {
    providers: Vec<ProviderConfig>,
    config: AggregatorConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    credentials: Arc<dyn CredentialSource>,
    clients: Vec<Arc<dyn ProviderClient>>,
    store: Option<Arc<dyn RecordStore>>,
    correlator: Correlator,
    disabled: Vec<ProviderId>,
}

impl Default for AggregatorBuilder {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            config: AggregatorConfig::default(),
            http_client: None,
            credentials: Arc::new(EnvCredentialSource),
            clients: Vec::new(),
            store: None,
            correlator: Correlator::default(),
            disabled: Vec::new(),
        }
    }
}

impl AggregatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the provider list with the catalogue's.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.providers = catalog.providers;
        self
    }

    pub fn with_provider(mut self, config: ProviderConfig) -> Self {
        self.providers.push(config);
        self
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Transport for every live provider, including certificate-authenticated ones.
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Uses `client` for its provider instead of building one. The client's
    /// configuration is registered, replacing any catalogue entry with the same id.
    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.push(client);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_correlator(mut self, correlator: Correlator) -> Self {
        self.correlator = correlator;
        self
    }

    /// Registers the provider disabled. Unknown ids are logged and ignored.
    pub fn disable(mut self, provider: ProviderId) -> Self {
        self.disabled.push(provider);
        self
    }

    pub fn build(self) -> Result<Aggregator, ValidationError> {
        let registry = Arc::new(SourceRegistry::from_catalog(Catalog::new(self.providers))?);
        for client in &self.clients {
            registry.register(client.config().clone())?;
        }

        let cache = CacheStore::new(self.config.cache_default_ttl);
        let limiter = Arc::new(
            RateLimiter::new(self.config.window_policy).with_max_wait(self.config.max_throttle_wait),
        );
        let factory = ClientFactory {
            config: &self.config,
            explicit_http: self.http_client.is_some(),
            http_client: self
                .http_client
                .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new())),
            credentials: self.credentials,
            cache: cache.clone(),
            limiter: Arc::clone(&limiter),
        };

        let supplied = self
            .clients
            .iter()
            .map(|client| client.id().clone())
            .collect::<HashSet<_>>();
        let mut clients = self.clients;
        for config in registry.list(&ProviderFilter::all()) {
            if !supplied.contains(&config.id) {
                clients.push(factory.build(config)?);
            }
        }
        drop(factory);

        for provider in &self.disabled {
            let _ = registry.toggle(provider, false);
        }

        log::info!(
            target: LOG_TARGET,
            "aggregator ready with {} provider(s){}",
            registry.len(),
            if self.config.simulated { " (simulated)" } else { "" }
        );

        Ok(Aggregator {
            router: SourceRouter::new(Arc::clone(&registry), clients),
            registry,
            correlator: self.correlator,
            events: EventBus::new(self.config.event_capacity),
            store: self.store,
            cache,
            limiter,
            config: self.config,
        })
    }
}

struct ClientFactory<'a> {
    config: &'a AggregatorConfig,
    explicit_http: bool,
    http_client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialSource>,
    cache: CacheStore<Value>,
    limiter: Arc<RateLimiter>,
}

impl ClientFactory<'_> {
    fn build(&self, provider: ProviderConfig) -> Result<Arc<dyn ProviderClient>, ValidationError> {
        let mode = if self.config.simulated {
            ClientMode::Simulated
        } else {
            provider.mode
        };

        match mode {
            ClientMode::Simulated => Ok(Arc::new(
                SimulatedProvider::new(provider, self.cache.clone())?
                    .with_latency(self.config.simulated_latency),
            )),
            ClientMode::Live => {
                let http_client = self
                    .certificate_client(&provider)
                    .unwrap_or_else(|| Arc::clone(&self.http_client));
                Ok(Arc::new(HttpProviderClient::new(
                    provider,
                    http_client,
                    Arc::clone(&self.credentials),
                    self.cache.clone(),
                    Arc::clone(&self.limiter),
                )?))
            }
        }
    }

    /// Dedicated mutual-TLS transport for certificate providers.
    fn certificate_client(&self, provider: &ProviderConfig) -> Option<Arc<dyn HttpClient>> {
        if self.explicit_http || !matches!(provider.auth.kind, AuthKind::Certificate) {
            return None;
        }

        let Some(credential) = self.credentials.credential(&provider.id) else {
            log::warn!(
                target: LOG_TARGET,
                "no client certificate configured for '{}', calls will fail authentication",
                provider.id
            );
            return None;
        };
        let key = credential.secret.as_deref().unwrap_or_default();
        match ReqwestHttpClient::with_identity(credential.value.as_bytes(), key.as_bytes()) {
            Ok(client) => Some(Arc::new(client)),
            Err(error) => {
                log::warn!(target: LOG_TARGET, "'{}': {error}", provider.id);
                None
            }
        }
    }
}

/// Aggregation engine over every registered provider.
pub struct Aggregator {
    registry: Arc<SourceRegistry>,
    router: SourceRouter,
    correlator: Correlator,
    events: EventBus,
    store: Option<Arc<dyn RecordStore>>,
    cache: CacheStore<Value>,
    limiter: Arc<RateLimiter>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn builder() -> AggregatorBuilder {
        AggregatorBuilder::new()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn router(&self) -> &SourceRouter {
        &self.router
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore<Value> {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Enables or disables a provider for subsequent runs.
    ///
    /// Returns whether the id is registered; unknown ids are only logged.
    pub fn toggle_provider(&self, provider: &ProviderId, enabled: bool) -> bool {
        self.registry.toggle(provider, enabled)
    }

    pub fn list_providers(&self, filter: &ProviderFilter) -> Vec<ProviderConfig> {
        self.registry.list(filter)
    }

    pub async fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.cache.clear(pattern).await
    }

    /// Calls one endpoint of one provider through its client pipeline.
    ///
    /// # Errors
    ///
    /// Unknown or disabled providers fail before any network activity.
    pub async fn call_provider(
        &self,
        provider: &ProviderId,
        request: CallRequest,
    ) -> Result<CallResponse, SourceError> {
        match self.registry.is_enabled(provider) {
            None => return Err(SourceError::unknown_provider(provider.as_str())),
            Some(false) => return Err(SourceError::provider_disabled(provider)),
            Some(true) => {}
        }
        let client = self
            .router
            .client(provider)
            .ok_or_else(|| SourceError::adapter_not_registered(provider))?;
        client.call(request).await
    }

    /// First-success lookup of `capability` for `subject`.
    pub async fn resolve(
        &self,
        capability: Capability,
        strategy: &SourceStrategy,
        subject: &SubjectId,
    ) -> FallbackResult<CallResponse> {
        let mode = self.config.cache_mode;
        self.router
            .route(capability, strategy, |endpoint| {
                CallRequest::new(&endpoint.id)
                    .with_param("subject", subject.as_str())
                    .with_cache_mode(mode)
            })
            .await
    }

    /// Display name and the provider that supplied it. Best effort: a chain
    /// that runs past the identity budget, rate-limit waits included, leaves
    /// the name blank.
    pub async fn resolve_identity(&self, subject: &SubjectId) -> Option<(String, ProviderId)> {
        let cache_key = format!("identity:{subject}");
        let mode = self.config.cache_mode;
        let capability = self.config.identity_capability;
        let budget = self.identity_budget();
        let chain = self.router.route(capability, &SourceStrategy::Auto, |endpoint| {
            CallRequest::new(&endpoint.id)
                .with_param("subject", subject.as_str())
                .with_cache_key(cache_key.as_str())
                .with_cache_mode(mode)
        });

        let Ok(outcome) = tokio::time::timeout(budget, chain).await else {
            log::warn!(
                target: LOG_TARGET,
                "identity for '{subject}' unresolved: no answer within {} ms",
                budget.as_millis()
            );
            return None;
        };

        match outcome {
            Ok(success) => {
                let name = mapping::display_name(&success.data.payload);
                if name.is_none() {
                    log::debug!(
                        target: LOG_TARGET,
                        "'{}' identity payload for '{subject}' has no name",
                        success.selected_source
                    );
                }
                name.map(|name| (name, success.selected_source))
            }
            Err(failure) => {
                log::warn!(target: LOG_TARGET, "identity for '{subject}' unresolved: {failure}");
                None
            }
        }
    }

    /// Aggregates one subject across every enabled provider.
    ///
    /// Never fails: provider problems are recorded in the returned aggregate.
    pub async fn collect_for_subject(&self, subject: &SubjectId) -> SubjectAggregate {
        let started = Instant::now();
        let identity = self.resolve_identity(subject).await;

        let providers = self
            .registry
            .list(&ProviderFilter::enabled())
            .into_iter()
            .filter(ProviderConfig::has_collect_endpoints)
            .collect::<Vec<_>>();
        log::debug!(
            target: LOG_TARGET,
            "collecting '{subject}' from {} provider(s)",
            providers.len()
        );

        let results = join_all(
            providers
                .iter()
                .map(|provider| self.collect_isolated(provider, subject)),
        )
        .await;

        let correlation = self.correlator.correlate(subject, &results);
        let (display_name, identity_source) = identity.unzip();
        let aggregate = SubjectAggregate::new(
            subject.clone(),
            display_name,
            identity_source,
            results,
            correlation.opportunities,
            correlation.pairings,
            elapsed_ms(started),
        );

        self.events.publish(ProgressEvent::SubjectCompleted {
            subject: subject.clone(),
            coverage: aggregate.coverage(),
            opportunities: aggregate.opportunities.len(),
            total_value: aggregate.total_value,
            elapsed_ms: aggregate.elapsed_ms,
        });

        if let Some(store) = &self.store {
            if let Err(error) = store.store(&aggregate).await {
                log::warn!(target: LOG_TARGET, "failed to store aggregate for '{subject}': {error}");
            }
        }

        aggregate
    }

    /// Aggregates `subjects` in sequential phases of `batch_size` concurrent subjects.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroBatchSize`] for a zero batch size.
    /// Invalid subject ids are reported in the summary, not as errors.
    pub async fn collect_batch(
        &self,
        subjects: &[String],
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Result<BatchSummary, ValidationError> {
        batch::run(self, subjects, batch_size, inter_batch_delay).await
    }

    /// [`collect_batch`](Self::collect_batch) with the configured batch size and delay.
    pub async fn collect_batch_with_defaults(
        &self,
        subjects: &[String],
    ) -> Result<BatchSummary, ValidationError> {
        self.collect_batch(subjects, self.config.batch_size, self.config.inter_batch_delay)
            .await
    }

    /// Probes every registered provider concurrently. Disabled providers are
    /// reported without being probed.
    pub async fn health_check(&self) -> Vec<HealthReport> {
        let providers = self.registry.list(&ProviderFilter::all());
        join_all(providers.iter().map(|provider| self.probe(provider))).await
    }

    async fn probe(&self, provider: &ProviderConfig) -> HealthReport {
        if !provider.enabled {
            return HealthReport::new(provider, HealthStatus::unhealthy("disabled", 0));
        }
        let Some(client) = self.router.client(&provider.id) else {
            return HealthReport::new(provider, HealthStatus::unhealthy("no client", 0));
        };

        let budget = provider
            .health_endpoint
            .as_deref()
            .and_then(|endpoint| provider.endpoint(endpoint))
            .map_or_else(
                || Duration::from_millis(provider.timeout_ms),
                |endpoint| provider.call_budget(endpoint),
            );
        let status = match tokio::time::timeout(budget, client.health()).await {
            Ok(status) => status,
            Err(_) => HealthStatus::unhealthy(
                format!("no answer within {} ms", budget.as_millis()),
                duration_ms(budget),
            ),
        };
        HealthReport::new(provider, status)
    }

    /// Whole identity chain: the provider timeout when set, otherwise the
    /// sum of every candidate's identity call budget.
    fn identity_budget(&self) -> Duration {
        if let Some(timeout) = self.config.provider_timeout {
            return timeout;
        }
        self.registry
            .list(&ProviderFilter::enabled())
            .iter()
            .filter_map(|provider| {
                provider
                    .endpoint_for(self.config.identity_capability)
                    .map(|endpoint| provider.call_budget(endpoint))
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// One provider attempt with timeout and panic isolation.
    async fn collect_isolated(&self, provider: &ProviderConfig, subject: &SubjectId) -> CollectionResult {
        let started = Instant::now();
        let budget = self
            .config
            .provider_timeout
            .unwrap_or_else(|| provider.collection_budget());
        let attempt = AssertUnwindSafe(self.collect_provider(provider, subject)).catch_unwind();

        let result = match within_work_budget(budget, attempt).await {
            Some(Ok(result)) => result,
            Some(Err(panic)) => {
                let error = SourceError::internal(format!(
                    "provider panicked: {}",
                    panic_message(panic.as_ref())
                ));
                failed_result(provider, subject, &error, started)
            }
            None => {
                let error = SourceError::timeout(format!(
                    "no answer within {} ms",
                    budget.as_millis()
                ));
                failed_result(provider, subject, &error, started)
            }
        };

        if let Some(error) = &result.error {
            log::warn!(
                target: LOG_TARGET,
                "'{}' failed for '{subject}': {error}",
                provider.id
            );
        }
        self.events.publish(ProgressEvent::ProviderCompleted {
            subject: subject.clone(),
            provider: result.provider.clone(),
            provider_name: result.provider_name.clone(),
            success: result.success,
            records_found: result.records_found,
            value_found: result.value_found,
            elapsed_ms: result.elapsed_ms,
            error: result.error.clone(),
        });
        result
    }

    /// Runs every collect endpoint of `provider` in order; the first failure fails the provider.
    async fn collect_provider(&self, provider: &ProviderConfig, subject: &SubjectId) -> CollectionResult {
        let started = Instant::now();
        let Some(client) = self.router.client(&provider.id) else {
            let error = SourceError::adapter_not_registered(&provider.id);
            return failed_result(provider, subject, &error, started);
        };

        let mut records = Vec::new();
        let mut cache_hits = 0;
        for endpoint in provider.collect_endpoints() {
            let request = CallRequest::new(&endpoint.id)
                .with_param("subject", subject.as_str())
                .with_cache_mode(self.config.cache_mode);
            let outcome = client.call(request).await.and_then(|response| {
                provider
                    .mapper
                    .map(&response.payload)
                    .map(|mapped| (mapped, response.cache_hit))
            });

            match outcome {
                Ok((mapped, cache_hit)) => {
                    records.extend(mapped);
                    cache_hits += usize::from(cache_hit);
                }
                Err(error) => return failed_result(provider, subject, &error, started),
            }
        }

        CollectionResult::succeeded(
            provider.id.clone(),
            provider.name.as_str(),
            provider.tier,
            subject.clone(),
            records,
            cache_hits,
            elapsed_ms(started),
        )
    }
}

fn failed_result(
    provider: &ProviderConfig,
    subject: &SubjectId,
    error: &SourceError,
    started: Instant,
) -> CollectionResult {
    CollectionResult::failed(
        provider.id.clone(),
        provider.name.as_str(),
        provider.tier,
        subject.clone(),
        error.code(),
        error.message(),
        elapsed_ms(started),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use serde_json::json;

    use super::*;
    use crate::provider_config::EndpointConfig;
    use crate::store::MemoryRecordStore;
    use crate::{Coverage, MapperKind};

    fn id(raw: &str) -> ProviderId {
        ProviderId::parse(raw).expect("valid id")
    }

    fn subject() -> SubjectId {
        SubjectId::parse("12.345.678/0001-90").expect("valid cnpj")
    }

    fn builtin(provider: &str) -> ProviderConfig {
        Catalog::builtin()
            .get(&id(provider))
            .cloned()
            .expect("builtin provider")
    }

    fn simulated(provider: &str, payload: Value) -> Arc<dyn ProviderClient> {
        let config = builtin(provider);
        let endpoint = config
            .collect_endpoints()
            .next()
            .map(|endpoint| endpoint.id.clone())
            .expect("collect endpoint");
        Arc::new(
            SimulatedProvider::new(config, CacheStore::disabled())
                .expect("valid config")
                .with_payload(endpoint, payload),
        )
    }

    /// Client whose every call panics.
    struct PanickingClient {
        config: ProviderConfig,
    }

    impl PanickingClient {
        async fn explode(&self) -> Result<CallResponse, SourceError> {
            panic!("mapper bug in {}", self.config.id)
        }
    }

    impl ProviderClient for PanickingClient {
        fn id(&self) -> &ProviderId {
            &self.config.id
        }

        fn config(&self) -> &ProviderConfig {
            &self.config
        }

        fn call<'a>(
            &'a self,
            _request: CallRequest,
        ) -> Pin<Box<dyn Future<Output = Result<CallResponse, SourceError>> + Send + 'a>> {
            Box::pin(self.explode())
        }

        fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>> {
            Box::pin(async { HealthStatus::healthy(0) })
        }
    }

    #[tokio::test]
    async fn panicking_provider_is_isolated() {
        let aggregator = Aggregator::builder()
            .with_client(simulated(
                "pgfn",
                json!({"inscricoes": [{"numero_inscricao": "80.1", "valor_consolidado": 1000.0}]}),
            ))
            .with_client(Arc::new(PanickingClient {
                config: builtin("serasa"),
            }))
            .build()
            .expect("valid aggregator");

        let aggregate = aggregator.collect_for_subject(&subject()).await;

        assert_eq!(aggregate.results.len(), 2);
        assert!(aggregate.result_for(&id("pgfn")).is_some_and(|result| result.success));
        let serasa = aggregate.result_for(&id("serasa")).expect("serasa recorded");
        assert!(!serasa.success);
        assert_eq!(serasa.error_code.as_deref(), Some("source.internal"));
        assert!(serasa
            .error
            .as_deref()
            .is_some_and(|error| error.contains("mapper bug in serasa")));
        assert_eq!(
            aggregate.coverage(),
            Coverage::Partial {
                succeeded: 1,
                attempted: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_without_blocking_siblings() {
        let slow = SimulatedProvider::new(builtin("cvm"), CacheStore::disabled())
            .expect("valid config")
            .with_latency(Duration::from_secs(600));
        let aggregator = Aggregator::builder()
            .with_config(AggregatorConfig::default().with_provider_timeout(Duration::from_secs(5)))
            .with_client(Arc::new(slow))
            .with_client(simulated("pgfn", json!({"inscricoes": []})))
            .build()
            .expect("valid aggregator");

        let aggregate = aggregator.collect_for_subject(&subject()).await;

        let cvm = aggregate.result_for(&id("cvm")).expect("cvm recorded");
        assert_eq!(cvm.error_code.as_deref(), Some("source.timeout"));
        assert!(aggregate.result_for(&id("pgfn")).is_some_and(|result| result.success));
        assert!(aggregate.elapsed_ms < 600_000);
    }

    #[tokio::test]
    async fn identity_fills_display_name_and_is_not_collected() {
        let store = Arc::new(MemoryRecordStore::new());
        let aggregator = Aggregator::builder()
            .with_catalog(Catalog::new(vec![builtin("brasilapi"), builtin("cvm")]))
            .with_config(AggregatorConfig {
                simulated: true,
                ..AggregatorConfig::default()
            })
            .with_store(store.clone())
            .build()
            .expect("valid aggregator");

        let aggregate = aggregator.collect_for_subject(&subject()).await;

        assert_eq!(
            aggregate.display_name.as_deref(),
            Some("EMPRESA SIMULADA 12345678 LTDA")
        );
        assert_eq!(aggregate.identity_source, Some(id("brasilapi")));
        assert_eq!(aggregate.results.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn call_provider_rejects_unknown_and_disabled_ids() {
        let aggregator = Aggregator::builder()
            .with_catalog(Catalog::builtin())
            .with_config(AggregatorConfig::simulated().with_simulated_latency(Duration::ZERO))
            .disable(id("cvm"))
            .build()
            .expect("valid aggregator");
        let request = CallRequest::new("holdings").with_param("subject", subject().as_str());

        let unknown = aggregator
            .call_provider(&id("nowhere"), request.clone())
            .await
            .expect_err("unknown provider");
        let disabled = aggregator
            .call_provider(&id("cvm"), request.clone())
            .await
            .expect_err("disabled provider");

        assert_eq!(unknown.code(), "source.unknown_provider");
        assert_eq!(disabled.code(), "source.provider_disabled");

        assert!(aggregator.toggle_provider(&id("cvm"), true));
        assert!(aggregator.call_provider(&id("cvm"), request).await.is_ok());
    }

    #[tokio::test]
    async fn health_check_reports_disabled_providers_without_probing() {
        let aggregator = Aggregator::builder()
            .with_catalog(Catalog::builtin())
            .with_config(AggregatorConfig::simulated().with_simulated_latency(Duration::ZERO))
            .disable(id("serasa"))
            .build()
            .expect("valid aggregator");

        let reports = aggregator.health_check().await;

        assert_eq!(reports.len(), 9);
        let serasa = reports
            .iter()
            .find(|report| report.provider == id("serasa"))
            .expect("serasa reported");
        assert!(!serasa.healthy);
        assert_eq!(serasa.detail.as_deref(), Some("disabled"));
        assert!(reports
            .iter()
            .filter(|report| report.enabled)
            .all(|report| report.healthy));
    }

    #[test]
    fn generic_catalog_entry_builds_a_live_client() {
        let custom = ProviderConfig::new(
            id("custom_registry"),
            "Custom",
            Tier::Tier4,
            "https://registry.test",
            MapperKind::Ieptb,
        )
        .with_endpoint(EndpointConfig::get(
            "protests",
            "/p/{subject}",
            Capability::NotaryProtests,
        ));

        let aggregator = Aggregator::builder()
            .with_provider(custom)
            .build()
            .expect("valid aggregator");

        assert!(aggregator.router().client(&id("custom_registry")).is_some());
    }
}
