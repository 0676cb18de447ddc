//! # Fiscalis Core
//!
//! Aggregation engine for tax-credit recovery over Brazilian data providers.
//!
//! ## Overview
//!
//! For each subject (a CPF or CNPJ) the engine queries every enabled provider
//! in parallel, normalizes what comes back into valued opportunities, and
//! hands a per-subject aggregate to a record store:
//!
//! - **Provider registry** built from a declarative catalog
//! - **Provider clients** with credentials, cache, rate limits, retry and a circuit breaker
//! - **Fallback routing** across providers that share a capability
//! - **Parallel aggregation** with per-provider timeouts and panic isolation
//! - **Opportunity correlation** with credit/debt compensation pairings
//! - **Batch runs** with bounded phases and progress events
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Live HTTP and simulated provider clients |
//! | [`aggregation`] | `Aggregator` and its builder |
//! | [`auth`] | Credential sources and per-provider token cache |
//! | [`batch`] | Phased batch runs and summaries |
//! | [`cache`] | TTL cache with single-flight computation |
//! | [`catalog`] | Builtin and JSON provider catalogs |
//! | [`circuit_breaker`] | Circuit breaker for upstream calls |
//! | [`config`] | Engine-wide settings |
//! | [`correlator`] | Opportunity valuation and pairing |
//! | [`data_source`] | Provider client trait, call and error types |
//! | [`domain`] | Subjects, records, opportunities, aggregates |
//! | [`error`] | Core error types |
//! | [`events`] | Progress events and notification sinks |
//! | [`http_client`] | HTTP client abstraction |
//! | [`mapping`] | Payload to record mappers |
//! | [`provider_config`] | Provider and endpoint configuration |
//! | [`registry`] | Runtime provider registry |
//! | [`retry`] | Retry policy and backoff |
//! | [`routing`] | Fallback chains and capability routing |
//! | [`source`] | Provider identifiers, tiers, capabilities |
//! | [`store`] | Record store trait and in-memory store |
//! | [`throttling`] | Multi-window rate limiter |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fiscalis_core::{Aggregator, AggregatorConfig, SubjectId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aggregator = Aggregator::builder()
//!         .with_config(AggregatorConfig::simulated())
//!         .build()?;
//!
//!     let subject = SubjectId::parse("12345678000190")?;
//!     let aggregate = aggregator.collect_for_subject(&subject).await;
//!
//!     println!("{}: {} opportunities", aggregate.subject, aggregate.opportunities.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Batch    │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Aggregator    │────▶│   Event Bus      │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Provider Client │────▶│ Cache / Limiter  │
//! │ (Adapter Trait) │     │ Retry / Breaker  │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Correlator    │────▶│  Record Store    │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Provider calls return [`SourceError`] with a stable classification:
//!
//! ```rust
//! use fiscalis_core::{SourceError, SourceErrorKind};
//!
//! fn handle_error(error: SourceError) {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited => {
//!             // Wait for the window to reopen
//!         }
//!         SourceErrorKind::Unavailable | SourceErrorKind::CircuitOpen => {
//!             // Try a fallback provider
//!         }
//!         kind if kind.is_configuration() => {
//!             // Report to the operator
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Credentials are read from environment variables and never logged
//! - Subject identifiers are validated before any provider is called

pub mod adapters;
pub mod aggregation;
pub mod auth;
pub mod batch;
pub mod cache;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod correlator;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod events;
pub mod http_client;
pub mod mapping;
pub mod provider_config;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod source;
pub mod store;
pub mod throttling;

// Provider clients
pub use adapters::{HttpProviderClient, SimulatedProvider};

// Engine
pub use aggregation::{Aggregator, AggregatorBuilder, HealthReport};
pub use batch::{BatchPhase, BatchSummary, ProviderTally, SubjectOutcome};
pub use config::{
    AggregatorConfig, DEFAULT_BATCH_SIZE, DEFAULT_INTER_BATCH_DELAY, DEFAULT_MAX_THROTTLE_WAIT,
};

// Credentials
pub use auth::{Authenticator, Credential, CredentialSource, EnvCredentialSource, StaticCredentialSource};

// Caching
pub use cache::{CacheMode, CacheOutcome, CacheStore};

// Provider catalog and registry
pub use catalog::Catalog;
pub use registry::{ProviderFilter, SourceRegistry};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Correlation
pub use correlator::{CategoryRule, Correlation, Correlator, PairingRules};

// Provider client trait and types
pub use data_source::{
    CallRequest, CallResponse, HealthState, HealthStatus, ProviderClient, SourceError,
    SourceErrorKind,
};

// Domain models
pub use domain::{
    CollectionResult, CompensationPairing, Coverage, Opportunity, OpportunityCategory, Priority,
    Provenance, SourceRecord, SubjectAggregate, SubjectId, SubjectKind, UtcDateTime,
};

// Error types
pub use error::{CoreError, ValidationError};

// Progress events
pub use events::{spawn_sink, EventBus, LogNotificationSink, NotificationSink, ProgressEvent};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Mapping
pub use mapping::{GenericMapper, MapperKind};

// Provider configuration
pub use provider_config::{
    AuthDescriptor, AuthKind, ClientMode, EndpointConfig, LimitWindow, ProviderConfig,
    RateLimitBudget, RetrySettings,
};

// Retry logic
pub use retry::{Backoff, RetryPolicy, RetryableError};

// Routing types
pub use routing::{
    FallbackChain, FallbackFailure, FallbackResult, FallbackSuccess, ProviderFailure,
    SourceRouter, SourceStrategy, StepFuture,
};

// Source identifiers
pub use source::{Capability, ProviderId, Tier, TransportKind};

// Record stores
pub use store::{MemoryRecordStore, RecordStore};

// Throttling
pub use throttling::{within_work_budget, RateLimiter, Throttled, WindowPolicy, WindowUsage};
