//! Fallback resolution over providers that answer the same logical query.
//!
//! [`FallbackChain`] runs ordered, provider-specific closures and returns
//! the first success. [`SourceRouter`] plans such a chain for a
//! [`Capability`] from the registry and the configured clients.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use crate::data_source::{CallRequest, CallResponse, ProviderClient, SourceError};
use crate::provider_config::EndpointConfig;
use crate::registry::SourceRegistry;
use crate::{Capability, ProviderId};

const LOG_TARGET: &str = "fiscalis::routing";

/// Provider selection strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SourceStrategy {
    /// Enabled providers offering the capability, by priority rank then recent health.
    #[default]
    Auto,
    /// Explicit order; duplicates are dropped.
    Priority(Vec<ProviderId>),
    /// One provider, no fallback.
    Strict(ProviderId),
}

/// One provider that was tried and failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub error: SourceError,
}

/// First successful answer of a chain.
#[derive(Debug, Clone)]
pub struct FallbackSuccess<T> {
    pub data: T,
    pub selected_source: ProviderId,
    /// Providers tried, in order, ending with `selected_source`.
    pub source_chain: Vec<ProviderId>,
    /// Failures that preceded the success.
    pub errors: Vec<ProviderFailure>,
    pub latency_ms: u64,
}

/// Every candidate failed, or there was none.
#[derive(Debug, Clone)]
pub struct FallbackFailure {
    pub source_chain: Vec<ProviderId>,
    pub errors: Vec<ProviderFailure>,
    pub latency_ms: u64,
}

impl FallbackFailure {
    /// Error of the last provider tried.
    pub fn last_error(&self) -> Option<&SourceError> {
        self.errors.last().map(|failure| &failure.error)
    }

    pub fn attempts(&self) -> usize {
        self.errors.len()
    }
}

impl Display for FallbackFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.last_error() {
            Some(error) => write!(
                f,
                "all {} provider(s) failed; last error: {error}",
                self.attempts()
            ),
            None => f.write_str("no provider candidates available"),
        }
    }
}

impl std::error::Error for FallbackFailure {}

pub type FallbackResult<T> = Result<FallbackSuccess<T>, FallbackFailure>;

/// Boxed future produced by one step of a [`FallbackChain`].
pub type StepFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

type Step<'a, T> = Box<dyn FnOnce() -> StepFuture<'a, T> + Send + 'a>;

/// Ordered provider-specific closures tried until one succeeds.
///
/// Steps run one at a time; a step is only invoked after every earlier
/// step has failed.
pub struct FallbackChain<'a, T> {
    steps: Vec<(ProviderId, Step<'a, T>)>,
}

impl<'a, T> Default for FallbackChain<'a, T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<'a, T> FallbackChain<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step<F>(mut self, provider: ProviderId, step: F) -> Self
    where
        F: FnOnce() -> StepFuture<'a, T> + Send + 'a,
    {
        self.push(provider, step);
        self
    }

    pub fn push<F>(&mut self, provider: ProviderId, step: F)
    where
        F: FnOnce() -> StepFuture<'a, T> + Send + 'a,
    {
        self.steps.push((provider, Box::new(step)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(self, label: &str) -> FallbackResult<T> {
        let started = Instant::now();
        let mut source_chain = Vec::with_capacity(self.steps.len());
        let mut errors = Vec::new();

        for (provider, step) in self.steps {
            source_chain.push(provider.clone());
            match step().await {
                Ok(data) => {
                    if !errors.is_empty() {
                        log::info!(
                            target: LOG_TARGET,
                            "'{label}' answered by '{provider}' after {} failed attempt(s)",
                            errors.len()
                        );
                    }
                    return Ok(FallbackSuccess {
                        data,
                        selected_source: provider,
                        source_chain,
                        errors,
                        latency_ms: elapsed_ms(started),
                    });
                }
                Err(error) => {
                    log::debug!(target: LOG_TARGET, "'{label}' failed on '{provider}': {error}");
                    errors.push(ProviderFailure { provider, error });
                }
            }
        }

        let failure = FallbackFailure {
            source_chain,
            errors,
            latency_ms: elapsed_ms(started),
        };
        log::warn!(target: LOG_TARGET, "'{label}': {failure}");
        Err(failure)
    }
}

/// Plans and runs fallback chains over registered provider clients.
pub struct SourceRouter {
    registry: Arc<SourceRegistry>,
    clients: HashMap<ProviderId, Arc<dyn ProviderClient>>,
    recent_failures: Mutex<HashMap<ProviderId, u32>>,
}

impl SourceRouter {
    pub fn new(registry: Arc<SourceRegistry>, clients: Vec<Arc<dyn ProviderClient>>) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.id().clone(), client))
            .collect();
        Self {
            registry,
            clients,
            recent_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self, provider: &ProviderId) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(provider).cloned()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Provider order the router would try for `capability`.
    pub fn plan(&self, capability: Capability, strategy: &SourceStrategy) -> Vec<ProviderId> {
        match strategy {
            SourceStrategy::Auto => self.auto_chain(capability),
            SourceStrategy::Priority(priority) => dedupe_chain(priority),
            SourceStrategy::Strict(provider) => vec![provider.clone()],
        }
    }

    /// Calls the endpoint answering `capability` on each planned provider until one succeeds.
    ///
    /// `request` builds the call for the chosen provider's endpoint.
    pub async fn route<R>(
        &self,
        capability: Capability,
        strategy: &SourceStrategy,
        request: R,
    ) -> FallbackResult<CallResponse>
    where
        R: Fn(&EndpointConfig) -> CallRequest + Send + Sync,
    {
        let request = &request;
        let mut chain: FallbackChain<'_, CallResponse> = FallbackChain::new();
        for provider in self.plan(capability, strategy) {
            let step_provider = provider.clone();
            chain.push(provider, move || {
                Box::pin(async move { self.call_capability(&step_provider, capability, request).await })
            });
        }

        let outcome = chain.run(capability.as_str()).await;
        self.remember(&outcome);
        outcome
    }

    /// Consecutive routed failures recorded for `provider`.
    pub fn recent_failures(&self, provider: &ProviderId) -> u32 {
        self.failures().get(provider).copied().unwrap_or(0)
    }

    async fn call_capability<R>(
        &self,
        provider: &ProviderId,
        capability: Capability,
        request: &R,
    ) -> Result<CallResponse, SourceError>
    where
        R: Fn(&EndpointConfig) -> CallRequest,
    {
        let config = self
            .registry
            .get(provider)
            .ok_or_else(|| SourceError::unknown_provider(provider.as_str()))?;
        if !config.enabled {
            return Err(SourceError::provider_disabled(provider));
        }
        let endpoint = config
            .endpoint_for(capability)
            .ok_or_else(|| SourceError::unknown_endpoint(provider, capability.as_str()))?;
        let client = self
            .client(provider)
            .ok_or_else(|| SourceError::adapter_not_registered(provider))?;

        client.call(request(endpoint)).await
    }

    fn auto_chain(&self, capability: Capability) -> Vec<ProviderId> {
        let failures = self.failures();
        let mut candidates = self
            .registry
            .providers_with_capability(capability)
            .into_iter()
            .enumerate()
            .map(|(rank, config)| {
                let failing = failures.get(&config.id).is_some_and(|count| *count > 0);
                (config.priority, failing, rank, config.id)
            })
            .collect::<Vec<_>>();
        candidates.sort();
        candidates
            .into_iter()
            .map(|(_, _, _, provider)| provider)
            .collect()
    }

    fn remember(&self, outcome: &FallbackResult<CallResponse>) {
        let errors = match outcome {
            Ok(success) => success.errors.as_slice(),
            Err(failure) => failure.errors.as_slice(),
        };
        let mut failures = self.failures();
        for failure in errors {
            if !failure.error.kind().is_configuration() {
                *failures.entry(failure.provider.clone()).or_insert(0) += 1;
            }
        }
        if let Ok(success) = outcome {
            let _ = failures.remove(&success.selected_source);
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<ProviderId, u32>> {
        self.recent_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn dedupe_chain(chain: &[ProviderId]) -> Vec<ProviderId> {
    let mut seen = HashSet::new();
    chain
        .iter()
        .filter(|provider| seen.insert(*provider))
        .cloned()
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
