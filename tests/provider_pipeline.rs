//! Behavior tests for the live provider call pipeline.
//!
//! These tests drive `HttpProviderClient` against a scripted transport and
//! check what reaches the network: cache hits, retries, rate-limit waits and
//! credential refreshes.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fiscalis_core::{
    AuthDescriptor, CacheMode, CacheStore, CallRequest, Capability, Credential, EndpointConfig,
    HttpClient, HttpError, HttpProviderClient, HttpRequest, HttpResponse, MapperKind,
    ProviderClient, ProviderConfig, ProviderId, RateLimitBudget, RateLimiter, RetrySettings,
    SourceErrorKind, StaticCredentialSource, Tier, WindowPolicy,
};
use tokio::time::Instant;

/// Transport that answers from a fixed script and records every request.
struct ScriptedTransport {
    script: Mutex<Vec<Result<HttpResponse, HttpError>>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn new(mut script: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn always_ok(body: &str, times: usize) -> Arc<Self> {
        Self::new(vec![Ok(HttpResponse::ok_json(body)); times])
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl HttpClient for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().expect("seen lock").push(request);
            self.script
                .lock()
                .expect("script lock")
                .pop()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "script exhausted")))
        })
    }
}

const SUBJECT: &str = "12345678000190";
const EMPTY_PROTESTS: &str = r#"{"protestos":[]}"#;

fn provider_id() -> ProviderId {
    ProviderId::parse("ieptb").expect("valid id")
}

fn protests_provider() -> ProviderConfig {
    ProviderConfig::new(
        provider_id(),
        "IEPTB - Protestos",
        Tier::Tier3,
        "https://protestos.test",
        MapperKind::Ieptb,
    )
    .with_endpoint(EndpointConfig::get(
        "protests",
        "/protestos/{subject}",
        Capability::NotaryProtests,
    ))
    .with_rate_limit(RateLimitBudget::per_minute(100))
    .with_retry(RetrySettings::new(3, 100, 2.0, 1_000))
}

fn client(
    config: ProviderConfig,
    transport: Arc<ScriptedTransport>,
    limiter: Arc<RateLimiter>,
) -> HttpProviderClient {
    let credentials = StaticCredentialSource::new().with(
        config.id.clone(),
        Credential::new("client-id").with_secret("client-secret"),
    );
    HttpProviderClient::new(
        config,
        transport,
        Arc::new(credentials),
        CacheStore::new(Duration::from_secs(300)),
        limiter,
    )
    .expect("valid provider config")
}

fn protests_request() -> CallRequest {
    CallRequest::new("protests").with_param("subject", SUBJECT)
}

// =============================================================================
// Cache and rate limiter
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_a_response_is_cached_the_repeat_call_spends_no_rate_budget() {
    // Given: A provider client with a fresh cache and limiter
    let transport = ScriptedTransport::always_ok(EMPTY_PROTESTS, 1);
    let limiter = Arc::new(RateLimiter::default());
    let client = client(protests_provider(), Arc::clone(&transport), Arc::clone(&limiter));

    // When: The same request is made twice
    let first = client.call(protests_request()).await.expect("first call");
    let second = client.call(protests_request()).await.expect("second call");

    // Then: Only the first reaches the network and the limiter
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.attempts, 0);
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(limiter.usage("ieptb:minute").total_granted, 1);
}

#[tokio::test(start_paused = true)]
async fn when_the_cache_is_bypassed_every_call_goes_to_the_network() {
    // Given: A provider client and a bypassing request
    let transport = ScriptedTransport::always_ok(EMPTY_PROTESTS, 2);
    let limiter = Arc::new(RateLimiter::default());
    let client = client(protests_provider(), Arc::clone(&transport), Arc::clone(&limiter));
    let request = protests_request().with_cache_mode(CacheMode::Bypass);

    // When: The request is made twice
    let _ = client.call(request.clone()).await.expect("first call");
    let second = client.call(request).await.expect("second call");

    // Then: Both calls hit the network and consume budget
    assert!(!second.cache_hit);
    assert_eq!(transport.requests().len(), 2);
    assert_eq!(limiter.usage("ieptb:minute").total_granted, 2);
}

#[tokio::test(start_paused = true)]
async fn when_the_window_is_full_the_next_call_waits_for_it_to_slide() {
    // Given: A provider allowed two calls per minute
    let transport = ScriptedTransport::always_ok(EMPTY_PROTESTS, 3);
    let limiter = Arc::new(RateLimiter::new(WindowPolicy::Sliding));
    let config = protests_provider().with_rate_limit(RateLimitBudget::per_minute(2));
    let client = client(config, Arc::clone(&transport), limiter);
    let request = protests_request().with_cache_mode(CacheMode::Bypass);
    let started = Instant::now();

    // When: Three calls are made back to back
    for _ in 0..3 {
        let _ = client.call(request.clone()).await.expect("call succeeds");
    }

    // Then: The third call was held until the first slot expired
    assert_eq!(transport.requests().len(), 3);
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn when_the_daily_budget_is_spent_the_call_fails_without_using_a_minute_slot() {
    // Given: A provider allowed five calls per minute but one per day
    let transport = ScriptedTransport::always_ok(EMPTY_PROTESTS, 2);
    let limiter = Arc::new(
        RateLimiter::new(WindowPolicy::Sliding).with_max_wait(Some(Duration::from_secs(90))),
    );
    let config = protests_provider().with_rate_limit(RateLimitBudget::per_minute(5).with_per_day(1));
    let client = client(config, Arc::clone(&transport), Arc::clone(&limiter));
    let request = protests_request().with_cache_mode(CacheMode::Bypass);
    let _ = client.call(request.clone()).await.expect("first call");
    let started = Instant::now();

    // When: A second call is made the same day
    let error = client.call(request).await.expect_err("daily budget spent");

    // Then: It fails at once as rate limited, holding no minute slot
    assert_eq!(error.kind(), SourceErrorKind::RateLimited);
    assert!(!error.retryable());
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(limiter.usage("ieptb:minute").in_window, 1);
    assert_eq!(limiter.usage("ieptb:minute").total_granted, 1);
    assert_eq!(limiter.usage("ieptb:day").total_granted, 1);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_upstream_recovers_the_call_succeeds_after_backoff() {
    // Given: An upstream that fails twice with 503 and then answers
    let transport = ScriptedTransport::new(vec![
        Ok(HttpResponse::new(503, "manutencao")),
        Ok(HttpResponse::new(503, "manutencao")),
        Ok(HttpResponse::ok_json(EMPTY_PROTESTS)),
    ]);
    let limiter = Arc::new(RateLimiter::default());
    let client = client(protests_provider(), Arc::clone(&transport), Arc::clone(&limiter));
    let started = Instant::now();

    // When: The call is made
    let response = client.call(protests_request()).await.expect("third attempt wins");

    // Then: Three attempts were made with 100ms + 200ms of backoff between them
    assert_eq!(response.attempts, 3);
    assert_eq!(transport.requests().len(), 3);
    assert_eq!(limiter.usage("ieptb:minute").total_granted, 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn when_upstream_stays_down_the_error_reports_every_attempt() {
    // Given: An upstream that never recovers
    let transport = ScriptedTransport::new(Vec::new());
    let limiter = Arc::new(RateLimiter::default());
    let client = client(protests_provider(), Arc::clone(&transport), limiter);

    // When: The call is made
    let error = client.call(protests_request()).await.expect_err("all attempts fail");

    // Then: The error is classified and counts the attempts made
    assert_eq!(error.kind(), SourceErrorKind::Unavailable);
    assert_eq!(error.attempts(), 3);
    assert_eq!(error.provider(), Some(&provider_id()));
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn when_upstream_rejects_the_request_it_is_not_retried() {
    // Given: An upstream that answers 422
    let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(422, "documento invalido"))]);
    let client = client(
        protests_provider(),
        Arc::clone(&transport),
        Arc::new(RateLimiter::default()),
    );

    // When: The call is made
    let error = client.call(protests_request()).await.expect_err("422 is terminal");

    // Then: One attempt, no retry
    assert_eq!(error.kind(), SourceErrorKind::Rejected);
    assert_eq!(error.attempts(), 1);
    assert_eq!(transport.requests().len(), 1);
}

// =============================================================================
// Credential refresh
// =============================================================================

fn oauth_provider() -> ProviderConfig {
    protests_provider().with_auth(AuthDescriptor::oauth2(
        "https://protestos.test/oauth/token",
        Some("consulta"),
    ))
}

#[tokio::test(start_paused = true)]
async fn when_the_token_is_rejected_it_is_refreshed_and_the_call_replayed_once() {
    // Given: A token endpoint and an upstream that rejects the first token
    let transport = ScriptedTransport::new(vec![
        Ok(HttpResponse::ok_json(r#"{"access_token":"stale","expires_in":3600}"#)),
        Ok(HttpResponse::new(401, "token revogado")),
        Ok(HttpResponse::ok_json(r#"{"access_token":"fresh","expires_in":3600}"#)),
        Ok(HttpResponse::ok_json(EMPTY_PROTESTS)),
    ]);
    let client = client(
        oauth_provider(),
        Arc::clone(&transport),
        Arc::new(RateLimiter::default()),
    );

    // When: The call is made
    let response = client.call(protests_request()).await.expect("replay succeeds");

    // Then: Two token fetches and two data requests, the replay with the new token
    let requests = transport.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].url, "https://protestos.test/oauth/token");
    assert_eq!(requests[1].header("authorization"), Some("Bearer stale"));
    assert_eq!(requests[2].url, "https://protestos.test/oauth/token");
    assert_eq!(requests[3].header("authorization"), Some("Bearer fresh"));
    assert_eq!(response.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn when_the_refreshed_token_is_also_rejected_the_call_fails_unauthorized() {
    // Given: An upstream that rejects every token
    let transport = ScriptedTransport::new(vec![
        Ok(HttpResponse::ok_json(r#"{"access_token":"a","expires_in":3600}"#)),
        Ok(HttpResponse::new(401, "")),
        Ok(HttpResponse::ok_json(r#"{"access_token":"b","expires_in":3600}"#)),
        Ok(HttpResponse::new(401, "")),
    ]);
    let client = client(
        oauth_provider(),
        Arc::clone(&transport),
        Arc::new(RateLimiter::default()),
    );

    // When: The call is made
    let error = client.call(protests_request()).await.expect_err("still rejected");

    // Then: Exactly one replay was attempted and the error is not retried
    assert_eq!(error.kind(), SourceErrorKind::Unauthorized);
    assert_eq!(transport.requests().len(), 4);
}
