//! Behavior tests for phased batch runs.
//!
//! These tests verify how a list of subjects is split into phases, how the
//! phases are paced, and what the run summary reports.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fiscalis_core::{
    Aggregator, AggregatorConfig, CacheStore, Capability, Catalog, EndpointConfig, HttpClient,
    HttpError, HttpRequest, HttpResponse, MapperKind, ProviderConfig, ProviderId, RateLimitBudget,
    RetrySettings, SimulatedProvider, SourceError, Tier, ValidationError,
};
use tokio::time::Instant;

/// Transport that answers every request with the same body.
struct CountingTransport {
    body: &'static str,
    calls: AtomicUsize,
}

impl CountingTransport {
    fn answering(body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            body,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpClient for CountingTransport {
    fn execute<'a>(
        &'a self,
        _request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse::ok_json(self.body))
        })
    }
}

const REGISTRY_ANSWER: &str = r#"{"razao_social":"ACME LTDA","protestos":[]}"#;

fn live_protests(rate_limit: RateLimitBudget) -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::parse("ieptb").expect("valid id"),
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
    .with_rate_limit(rate_limit)
    .with_retry(RetrySettings::new(1, 100, 2.0, 1_000))
    .with_timeout_ms(1_000)
}

fn live_identity(rate_limit: RateLimitBudget) -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::parse("receita").expect("valid id"),
        "Receita - Cadastro",
        Tier::Tier1,
        "https://cadastro.test",
        MapperKind::Identity,
    )
    .with_endpoint(EndpointConfig::get(
        "identity",
        "/cnpj/{subject}",
        Capability::Identity,
    ))
    .with_rate_limit(rate_limit)
    .with_retry(RetrySettings::new(1, 100, 2.0, 1_000))
    .with_timeout_ms(1_000)
}

fn subjects(count: usize) -> Vec<String> {
    (0..count)
        .map(|n| format!("{:08}0001{:02}", 10_000_000 + n, n % 100))
        .collect()
}

fn simulated_aggregator(latency: Duration) -> Aggregator {
    Aggregator::builder()
        .with_catalog(Catalog::builtin())
        .with_config(AggregatorConfig::simulated().with_simulated_latency(latency))
        .build()
        .expect("valid aggregator")
}

// =============================================================================
// Batch: phases and pacing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_subjects_exceed_the_batch_size_they_run_in_ceil_n_over_b_phases() {
    // Given: Ten subjects and a batch size of four
    let aggregator = simulated_aggregator(Duration::from_millis(100));
    let input = subjects(10);

    // When: The batch runs without delay
    let summary = aggregator
        .collect_batch(&input, 4, Duration::ZERO)
        .await
        .expect("batch runs");

    // Then: Three phases of 4, 4 and 2 subjects
    let sizes = summary
        .phases
        .iter()
        .map(|phase| phase.subjects)
        .collect::<Vec<_>>();
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(summary.attempted, 10);
    assert_eq!(summary.processed, 10);
    assert_eq!(summary.outcomes.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn phases_are_separated_by_the_inter_batch_delay_only() {
    // Given: Ten subjects, batches of four and a two second pause
    let aggregator = simulated_aggregator(Duration::from_millis(100));
    let input = subjects(10);
    let started = Instant::now();

    // When: The batch runs
    let summary = aggregator
        .collect_batch(&input, 4, Duration::from_secs(2))
        .await
        .expect("batch runs");

    // Then: Two pauses were taken, none after the last phase
    let elapsed = started.elapsed();
    assert_eq!(summary.phases.len(), 3);
    assert!(elapsed >= Duration::from_secs(4));
    assert!(elapsed < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn subjects_within_a_phase_are_collected_concurrently() {
    // Given: Every simulated call takes one second
    let aggregator = simulated_aggregator(Duration::from_secs(1));
    let input = subjects(5);
    let started = Instant::now();

    // When: Five subjects run in a single phase
    let summary = aggregator
        .collect_batch(&input, 5, Duration::ZERO)
        .await
        .expect("batch runs");

    // Then: The phase takes about as long as one subject, not five
    assert_eq!(summary.phases.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn configured_defaults_drive_collect_batch_with_defaults() {
    // Given: A configuration with batches of three and no pause
    let aggregator = Aggregator::builder()
        .with_catalog(Catalog::builtin())
        .with_config(
            AggregatorConfig::simulated()
                .with_simulated_latency(Duration::ZERO)
                .with_batching(3, Duration::ZERO),
        )
        .build()
        .expect("valid aggregator");

    // When: Seven subjects run with the configured defaults
    let summary = aggregator
        .collect_batch_with_defaults(&subjects(7))
        .await
        .expect("batch runs");

    // Then: They ran in phases of three
    assert_eq!(summary.phases.len(), 3);
}

// =============================================================================
// Batch: summary accounting
// =============================================================================

#[tokio::test]
async fn a_zero_batch_size_is_rejected_before_any_work() {
    // Given: An aggregator and a subscriber
    let aggregator = simulated_aggregator(Duration::ZERO);
    let mut events = aggregator.subscribe();

    // When: A batch with size zero is requested
    let error = aggregator
        .collect_batch(&subjects(3), 0, Duration::ZERO)
        .await
        .expect_err("zero batch size");

    // Then: It fails validation and nothing was published
    assert_eq!(error, ValidationError::ZeroBatchSize);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn an_empty_subject_list_yields_an_empty_summary() {
    // Given: An aggregator
    let aggregator = simulated_aggregator(Duration::ZERO);

    // When: An empty batch runs
    let summary = aggregator
        .collect_batch(&[], 10, Duration::from_secs(2))
        .await
        .expect("batch runs");

    // Then: Nothing was attempted
    assert_eq!(summary.attempted, 0);
    assert!(summary.phases.is_empty());
    assert_eq!(summary.total_opportunities, 0);
}

#[tokio::test]
async fn subjects_where_every_provider_fails_count_as_failed() {
    // Given: A single provider that always fails
    let dead = ProviderConfig::new(
        ProviderId::parse("dead").expect("valid id"),
        "Dead Registry",
        Tier::Tier4,
        "https://dead.test",
        MapperKind::Ieptb,
    )
    .with_endpoint(EndpointConfig::get(
        "protests",
        "/p/{subject}",
        Capability::NotaryProtests,
    ));
    let client = SimulatedProvider::new(dead, CacheStore::disabled())
        .expect("valid config")
        .with_failure(SourceError::unavailable("down"));
    let aggregator = Aggregator::builder()
        .with_client(Arc::new(client))
        .build()
        .expect("valid aggregator");

    // When: Two subjects run
    let summary = aggregator
        .collect_batch(&subjects(2), 10, Duration::ZERO)
        .await
        .expect("batch runs");

    // Then: Both were processed but neither collected anything
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.fully_collected, 0);
    assert_eq!(summary.per_provider.len(), 1);
    assert_eq!(summary.per_provider[0].failed, 2);
}

#[tokio::test]
async fn the_summary_serializes_for_reporting() {
    // Given: A finished run
    let aggregator = simulated_aggregator(Duration::ZERO);
    let summary = aggregator
        .collect_batch(&subjects(2), 10, Duration::ZERO)
        .await
        .expect("batch runs");

    // When: It is rendered as JSON
    let json = serde_json::to_value(&summary).expect("summary serializes");

    // Then: The headline counters are present
    assert_eq!(json["attempted"], 2);
    assert_eq!(json["processed"], 2);
    assert_eq!(json["phases"].as_array().map(Vec::len), Some(1));
    assert!(json["run_id"].is_string());
}

// =============================================================================
// Batch: rate-limit backpressure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_a_provider_budget_is_full_later_subjects_wait_instead_of_failing() {
    // Given: A live provider allowed two calls per minute and a single attempt
    let transport = CountingTransport::answering(REGISTRY_ANSWER);
    let aggregator = Aggregator::builder()
        .with_provider(live_protests(RateLimitBudget::per_minute(2)))
        .with_http_client(transport.clone())
        .build()
        .expect("valid aggregator");
    let started = Instant::now();

    // When: Three subjects run one per phase without delay
    let summary = aggregator
        .collect_batch(&subjects(3), 1, Duration::ZERO)
        .await
        .expect("batch runs");

    // Then: The third subject waited for the window and was still collected
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.fully_collected, 3);
    assert_eq!(summary.per_provider[0].failed, 0);
    assert_eq!(transport.calls(), 3);
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn when_the_identity_budget_is_spent_the_name_is_left_blank_within_the_timeout() {
    // Given: An identity provider allowed one call per day, a five second
    //        provider timeout and no bound on limiter waits
    let transport = CountingTransport::answering(REGISTRY_ANSWER);
    let aggregator = Aggregator::builder()
        .with_provider(live_identity(RateLimitBudget::unlimited().with_per_day(1)))
        .with_provider(live_protests(RateLimitBudget::unlimited()))
        .with_http_client(transport.clone())
        .with_config(
            AggregatorConfig::default()
                .with_provider_timeout(Duration::from_secs(5))
                .with_max_throttle_wait(None),
        )
        .build()
        .expect("valid aggregator");
    let started = Instant::now();

    // When: Two subjects run in the same phase
    let summary = aggregator
        .collect_batch(&subjects(2), 10, Duration::ZERO)
        .await
        .expect("batch runs");

    // Then: Only one subject got a name and the run did not wait for the next day
    let named = summary
        .outcomes
        .iter()
        .filter(|outcome| outcome.display_name.as_deref() == Some("ACME LTDA"))
        .count();
    assert_eq!(named, 1);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.fully_collected, 2);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(transport.calls(), 3);
}
