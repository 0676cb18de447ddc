use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::adapters::template::PathTemplate;
use crate::auth::{Authenticator, CredentialSource};
use crate::cache::{CacheOutcome, CacheStore};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::data_source::{
    CallRequest, CallResponse, HealthState, HealthStatus, ProviderClient, SourceError,
    SourceErrorKind,
};
use crate::http_client::{HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::provider_config::{EndpointConfig, LimitWindow, ProviderConfig};
use crate::retry::RetryPolicy;
use crate::throttling::RateLimiter;
use crate::{CacheMode, ProviderId, ValidationError};

const LOG_TARGET: &str = "fiscalis::adapters::http";

#[derive(Debug)]
struct EndpointTemplates {
    path: PathTemplate,
    body: Option<PathTemplate>,
}

/// Live client for one provider.
///
/// Call pipeline, outermost first:
///
/// ```text
/// cache ─▶ retry ─▶ circuit breaker ─▶ rate limiter ─▶ auth ─▶ network (timeout)
/// ```
///
/// A cache hit returns before the limiter is consulted, so it never consumes
/// provider budget. Every network attempt, including a post-refresh replay,
/// takes one slot in each configured window.
pub struct HttpProviderClient {
    config: ProviderConfig,
    http_client: Arc<dyn HttpClient>,
    authenticator: Authenticator,
    cache: CacheStore<Value>,
    limiter: Arc<RateLimiter>,
    circuit_breaker: CircuitBreaker,
    limiter_keys: Vec<(String, LimitWindow)>,
    templates: HashMap<String, EndpointTemplates>,
}

impl std::fmt::Debug for HttpProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProviderClient")
            .field("provider", &self.config.id)
            .field("base_url", &self.config.base_url)
            .field("authenticator", &self.authenticator)
            .field("circuit", &self.circuit_breaker.state())
            .finish()
    }
}

impl HttpProviderClient {
    pub fn new(
        config: ProviderConfig,
        http_client: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialSource>,
        cache: CacheStore<Value>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;

        let templates = config
            .endpoints
            .iter()
            .map(|endpoint| {
                Ok((
                    endpoint.id.clone(),
                    EndpointTemplates {
                        path: PathTemplate::parse(&endpoint.path)?,
                        body: endpoint.body.as_deref().map(PathTemplate::parse_lenient),
                    },
                ))
            })
            .collect::<Result<HashMap<_, _>, ValidationError>>()?;

        let authenticator = Authenticator::new(
            config.id.clone(),
            config.auth.clone(),
            credentials,
            Arc::clone(&http_client),
        );
        let circuit_breaker = CircuitBreaker::new(config.id.as_str(), config.circuit_breaker);
        let limiter_keys = config.limiter_keys();

        Ok(Self {
            config,
            http_client,
            authenticator,
            cache,
            limiter,
            circuit_breaker,
            limiter_keys,
            templates,
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    async fn execute_call(&self, request: CallRequest) -> Result<CallResponse, SourceError> {
        let started = Instant::now();
        let endpoint = self
            .config
            .endpoint(&request.endpoint)
            .ok_or_else(|| SourceError::unknown_endpoint(&self.config.id, &request.endpoint))?;
        let templates = self
            .templates
            .get(&endpoint.id)
            .ok_or_else(|| SourceError::unknown_endpoint(&self.config.id, &endpoint.id))?;

        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            templates.path.render_path(&request.params)?
        );
        let body = templates
            .body
            .as_ref()
            .map(|template| template.render_body(&request.params))
            .transpose()?;

        let cache_key = request.effective_cache_key(&self.config.id);
        let ttl = self.config.cache_ttl_for(endpoint);
        let attempts = AtomicU32::new(0);
        let (url, body, counter) = (url.as_str(), body.as_deref(), &attempts);

        let (payload, outcome) = self
            .cache
            .get_or_compute_with_mode(request.cache_mode, &cache_key, Some(ttl), move || {
                self.fetch(endpoint, url, body, counter)
            })
            .await?;

        if outcome == CacheOutcome::Hit {
            log::debug!(target: LOG_TARGET, "'{}' served '{cache_key}' from cache", self.config.id);
        }

        Ok(CallResponse {
            payload,
            cache_hit: outcome == CacheOutcome::Hit,
            attempts: attempts.load(Ordering::SeqCst),
            latency_ms: elapsed_ms(started),
        })
    }

    /// Retry loop around single network attempts.
    async fn fetch(
        &self,
        endpoint: &EndpointConfig,
        url: &str,
        body: Option<&str>,
        attempts: &AtomicU32,
    ) -> Result<Value, SourceError> {
        let policy = RetryPolicy::from(&self.config.retry_for(endpoint));
        let label = format!("{}:{}", self.config.id, endpoint.id);
        let refreshed = AtomicBool::new(false);
        let refreshed = &refreshed;

        let result = policy
            .run(&label, move |_| async move {
                self.attempt(endpoint, url, body, attempts, refreshed).await
            })
            .await;

        if let Err(error) = &result {
            log::warn!(
                target: LOG_TARGET,
                "'{label}' failed after {} attempt(s): {error}",
                error.attempts()
            );
        }
        result
    }

    async fn attempt(
        &self,
        endpoint: &EndpointConfig,
        url: &str,
        body: Option<&str>,
        attempts: &AtomicU32,
        refreshed: &AtomicBool,
    ) -> Result<Value, SourceError> {
        if !self.circuit_breaker.allow_request() {
            let retry_in = self
                .circuit_breaker
                .retry_after()
                .unwrap_or(Duration::ZERO);
            return Err(SourceError::circuit_open(format!(
                "circuit for '{}' is open; next probe in {:.1}s",
                self.config.id,
                retry_in.as_secs_f64()
            )));
        }

        let auth = self.authenticator.authorize().await?;
        let mut response = self.send(endpoint, url, body, &auth, attempts).await;

        let rejected_credentials = matches!(&response, Ok(r) if r.status == 401 || r.status == 403);
        if rejected_credentials
            && self.authenticator.auto_refresh()
            && !refreshed.swap(true, Ordering::SeqCst)
        {
            log::info!(
                target: LOG_TARGET,
                "'{}' rejected credentials; refreshing and replaying once",
                self.config.id
            );
            let auth = self.authenticator.refresh().await?;
            response = self.send(endpoint, url, body, &auth, attempts).await;
        }

        let outcome = response.and_then(decode);
        match &outcome {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(error) if counts_against_circuit(error) => self.circuit_breaker.record_failure(),
            Err(_) => {}
        }
        outcome
    }

    /// One rate-limited network round trip bounded by the endpoint timeout.
    async fn send(
        &self,
        endpoint: &EndpointConfig,
        url: &str,
        body: Option<&str>,
        auth: &HttpAuth,
        attempts: &AtomicU32,
    ) -> Result<HttpResponse, SourceError> {
        self.acquire_budget().await?;
        let _ = attempts.fetch_add(1, Ordering::SeqCst);

        let timeout = self.config.timeout_for(endpoint);
        let mut request = HttpRequest::new(endpoint.method, url)
            .with_header("accept", "application/json")
            .with_timeout_ms(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
            .with_auth(auth);
        if let Some(body) = body {
            request = request.with_body(body);
            if endpoint.method == HttpMethod::Post {
                request = request.with_header("content-type", "application/json");
            }
        }

        match tokio::time::timeout(timeout, self.http_client.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(SourceError::from_http(&error)),
            Err(_) => Err(SourceError::timeout(format!(
                "'{}' did not answer within {}ms",
                self.config.id,
                timeout.as_millis()
            ))),
        }
    }

    /// One slot in every window, taken together.
    async fn acquire_budget(&self) -> Result<(), SourceError> {
        match self.limiter.acquire_all(&self.limiter_keys).await {
            Ok(waited) => {
                if !waited.is_zero() {
                    log::debug!(
                        target: LOG_TARGET,
                        "waited {}ms for '{}' budget",
                        waited.as_millis(),
                        self.config.id
                    );
                }
                Ok(())
            }
            Err(throttled) => Err(SourceError::throttled(throttled.to_string())
                .with_provider(self.config.id.clone())),
        }
    }

    fn rate_available(&self) -> bool {
        self.limiter_keys.iter().all(|(key, window)| {
            self.limiter
                .has_capacity(key, window.max_requests, window.window)
        })
    }

    async fn probe(&self) -> HealthStatus {
        let started = Instant::now();
        let rate_available = self.rate_available();

        if self.circuit_breaker.state() == CircuitState::Open
            && self
                .circuit_breaker
                .retry_after()
                .is_some_and(|remaining| !remaining.is_zero())
        {
            return HealthStatus {
                rate_available,
                ..HealthStatus::unhealthy("circuit open", 0)
            };
        }

        let Some(endpoint) = self.config.health_endpoint.clone() else {
            let state = if rate_available {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            };
            return HealthStatus::new(state, rate_available, 0)
                .with_detail(format!("circuit {}", self.circuit_breaker.state().as_str()));
        };

        let request = CallRequest::new(endpoint).with_cache_mode(CacheMode::Bypass);
        match self.execute_call(request).await {
            Ok(response) => {
                let state = if rate_available {
                    HealthState::Healthy
                } else {
                    HealthState::Degraded
                };
                HealthStatus::new(state, rate_available, response.latency_ms)
            }
            Err(error) => HealthStatus {
                rate_available,
                ..HealthStatus::unhealthy(error.to_string(), elapsed_ms(started))
            },
        }
    }
}

impl ProviderClient for HttpProviderClient {
    fn id(&self) -> &ProviderId {
        &self.config.id
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn call<'a>(
        &'a self,
        request: CallRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResponse, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            self.execute_call(request)
                .await
                .map_err(|error| error.with_provider(self.config.id.clone()))
        })
    }

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>> {
        Box::pin(self.probe())
    }
}

fn decode(response: HttpResponse) -> Result<Value, SourceError> {
    if !response.is_success() {
        return Err(SourceError::from_status(response.status, &response.body));
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body)
        .map_err(|error| SourceError::invalid_response(format!("response is not valid json: {error}")))
}

/// Only upstream-side failures trip the breaker; client errors say nothing about availability.
fn counts_against_circuit(error: &SourceError) -> bool {
    matches!(
        error.kind(),
        SourceErrorKind::Unavailable | SourceErrorKind::Timeout
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::auth::{Credential, StaticCredentialSource};
    use crate::mapping::MapperKind;
    use crate::provider_config::{AuthDescriptor, RateLimitBudget, RetrySettings};
    use crate::{Capability, Tier};

    #[derive(Default)]
    struct ScriptedHttpClient {
        responses: Mutex<Vec<Result<HttpResponse, crate::http_client::HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttpClient {
        fn new(responses: Vec<Result<HttpResponse, crate::http_client::HttpError>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    impl HttpClient for ScriptedHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<HttpResponse, crate::http_client::HttpError>>
                    + Send
                    + 'a,
            >,
        > {
            Box::pin(async move {
                self.requests.lock().expect("requests lock").push(request);
                self.responses
                    .lock()
                    .expect("responses lock")
                    .pop()
                    .unwrap_or_else(|| Ok(HttpResponse::new(500, "script exhausted")))
            })
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig::new(
            ProviderId::parse("serasa").expect("valid id"),
            "Serasa",
            Tier::Tier3,
            "https://serasa.test/",
            MapperKind::Serasa,
        )
        .with_endpoint(EndpointConfig::get(
            "pendencies",
            "/pendencias/{subject}",
            Capability::CreditBureau,
        ))
        .with_auth(AuthDescriptor::api_key("x-api-key"))
        .with_rate_limit(RateLimitBudget::per_minute(100))
        .with_retry(RetrySettings::new(3, 10, 2.0, 100))
    }

    fn client(http: Arc<ScriptedHttpClient>, config: ProviderConfig) -> HttpProviderClient {
        let credentials = StaticCredentialSource::new()
            .with(config.id.clone(), Credential::new("key-1"));
        HttpProviderClient::new(
            config,
            http,
            Arc::new(credentials),
            CacheStore::new(Duration::from_secs(60)),
            Arc::new(RateLimiter::default()),
        )
        .expect("valid config")
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_template_and_injects_api_key() {
        let http = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::ok_json(
            r#"{"pendencias":[]}"#,
        ))]));
        let client = client(Arc::clone(&http), config());

        let response = client
            .call(CallRequest::new("pendencies").with_param("subject", "12345678901"))
            .await
            .expect("call succeeds");

        assert_eq!(response.attempts, 1);
        let requests = http.requests();
        assert_eq!(requests[0].url, "https://serasa.test/pendencias/12345678901");
        assert_eq!(requests[0].header("x-api-key"), Some("key-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let http = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::new(
            404, "nao encontrado",
        ))]));
        let client = client(Arc::clone(&http), config());

        let error = client
            .call(CallRequest::new("pendencies").with_param("subject", "12345678901"))
            .await
            .expect_err("404 is terminal");

        assert_eq!(error.kind(), SourceErrorKind::Rejected);
        assert_eq!(error.attempts(), 1);
        assert_eq!(error.provider().map(ProviderId::as_str), Some("serasa"));
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_is_terminal_invalid_response() {
        let http = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::ok_json(
            "<html>manutencao</html>",
        ))]));
        let client = client(Arc::clone(&http), config());

        let error = client
            .call(CallRequest::new("pendencies").with_param("subject", "12345678901"))
            .await
            .expect_err("html is not json");

        assert_eq!(error.kind(), SourceErrorKind::InvalidResponse);
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_endpoint_and_missing_param_fail_before_network() {
        let http = Arc::new(ScriptedHttpClient::new(Vec::new()));
        let client = client(Arc::clone(&http), config());

        let unknown = client
            .call(CallRequest::new("nope"))
            .await
            .expect_err("unknown endpoint");
        let missing = client
            .call(CallRequest::new("pendencies"))
            .await
            .expect_err("missing subject");

        assert_eq!(unknown.kind(), SourceErrorKind::UnknownEndpoint);
        assert_eq!(missing.kind(), SourceErrorKind::MissingParameter);
        assert!(http.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_outages_open_the_circuit() {
        let http = Arc::new(ScriptedHttpClient::new(Vec::new()));
        let mut config = config().with_retry(RetrySettings::new(1, 0, 1.0, 0));
        config.circuit_breaker.failure_threshold = 2;
        let client = client(Arc::clone(&http), config);
        let request = CallRequest::new("pendencies")
            .with_param("subject", "12345678901")
            .with_cache_mode(CacheMode::Bypass);

        for _ in 0..2 {
            let error = client.call(request.clone()).await.expect_err("500");
            assert_eq!(error.kind(), SourceErrorKind::Unavailable);
        }
        let error = client.call(request).await.expect_err("circuit open");

        assert_eq!(error.kind(), SourceErrorKind::CircuitOpen);
        assert_eq!(http.requests().len(), 2);
        assert_eq!(client.health().await.state, HealthState::Unhealthy);
    }
}
