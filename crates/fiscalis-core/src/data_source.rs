//! Provider client contract and per-call request/response types.
//!
//! # Error taxonomy
//!
//! | Class | Kinds | Retried |
//! |-------|-------|---------|
//! | Configuration | `UnknownProvider`, `ProviderDisabled`, `UnknownEndpoint`, `MissingParameter`, `AdapterNotRegistered` | never |
//! | Authentication | `Unauthorized` | one refresh-and-replay when `auto_refresh` is set |
//! | Transient | `Unavailable`, `Timeout`, `RateLimited` | per [`RetryPolicy`](crate::RetryPolicy) |
//! | Validation | `InvalidResponse`, `Rejected` | never |
//! | Protection | `CircuitOpen` | never |
//!
//! # Example
//!
//! ```rust,ignore
//! use fiscalis_core::{CallRequest, ProviderClient, SourceError};
//!
//! async fn debts(client: &dyn ProviderClient) -> Result<(), SourceError> {
//!     let response = client
//!         .call(CallRequest::new("debts").with_param("subject", "12345678000190"))
//!         .await?;
//!     println!("{} (cache hit: {})", response.payload, response.cache_hit);
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;
use crate::http_client::{HttpError, HttpErrorKind};
use crate::provider_config::ProviderConfig;
use crate::retry::RetryableError;
use crate::ProviderId;

const MAX_BODY_SNIPPET: usize = 200;

/// Health state reported by provider clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Runtime health snapshot of one provider client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    /// Whether every rate-limit window currently has room.
    pub rate_available: bool,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthStatus {
    pub const fn new(state: HealthState, rate_available: bool, response_time_ms: u64) -> Self {
        Self {
            state,
            rate_available,
            response_time_ms,
            detail: None,
        }
    }

    pub const fn healthy(response_time_ms: u64) -> Self {
        Self::new(HealthState::Healthy, true, response_time_ms)
    }

    pub fn unhealthy(detail: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(HealthState::Unhealthy, true, response_time_ms)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub const fn is_healthy(&self) -> bool {
        !matches!(self.state, HealthState::Unhealthy)
    }
}

/// Per-call error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    UnknownProvider,
    ProviderDisabled,
    UnknownEndpoint,
    MissingParameter,
    AdapterNotRegistered,
    Unauthorized,
    Unavailable,
    Timeout,
    RateLimited,
    InvalidResponse,
    Rejected,
    CircuitOpen,
    Internal,
}

impl SourceErrorKind {
    pub const fn is_configuration(self) -> bool {
        matches!(
            self,
            Self::UnknownProvider
                | Self::ProviderDisabled
                | Self::UnknownEndpoint
                | Self::MissingParameter
                | Self::AdapterNotRegistered
        )
    }
}

/// Structured error for one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    attempts: u32,
    provider: Option<ProviderId>,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            attempts: 0,
            provider: None,
        }
    }

    pub fn unknown_provider(provider: &str) -> Self {
        Self::new(
            SourceErrorKind::UnknownProvider,
            format!("provider '{provider}' is not registered"),
            false,
        )
    }

    pub fn provider_disabled(provider: &ProviderId) -> Self {
        Self::new(
            SourceErrorKind::ProviderDisabled,
            format!("provider '{provider}' is disabled"),
            false,
        )
        .with_provider(provider.clone())
    }

    pub fn unknown_endpoint(provider: &ProviderId, endpoint: &str) -> Self {
        Self::new(
            SourceErrorKind::UnknownEndpoint,
            format!("provider '{provider}' has no endpoint '{endpoint}'"),
            false,
        )
        .with_provider(provider.clone())
    }

    pub fn missing_parameter(name: &str) -> Self {
        Self::new(
            SourceErrorKind::MissingParameter,
            format!("missing required parameter '{name}'"),
            false,
        )
    }

    pub fn adapter_not_registered(provider: &ProviderId) -> Self {
        Self::new(
            SourceErrorKind::AdapterNotRegistered,
            format!("no client is registered for provider '{provider}'"),
            false,
        )
        .with_provider(provider.clone())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unauthorized, message, false)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unavailable, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Timeout, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message, true)
    }

    /// Local budget exhausted for longer than the caller may wait. Retrying
    /// inside the same call cannot help.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message, false)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidResponse, message, false)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Rejected, message, false)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::CircuitOpen, message, false)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Internal, message, false)
    }

    /// Classifies a non-2xx HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet = body_snippet(body);
        let message = if snippet.is_empty() {
            format!("upstream returned status {status}")
        } else {
            format!("upstream returned status {status}: {snippet}")
        };

        match status {
            401 | 403 => Self::unauthorized(message),
            408 => Self::timeout(message),
            429 => Self::rate_limited(message),
            500..=599 => Self::unavailable(message),
            _ => Self::rejected(message),
        }
    }

    pub fn from_http(error: &HttpError) -> Self {
        let message = format!("transport error: {}", error.message());
        match error.kind() {
            HttpErrorKind::Timeout => Self::timeout(message),
            HttpErrorKind::Connect => Self::unavailable(message),
            HttpErrorKind::Other if error.retryable() => Self::unavailable(message),
            HttpErrorKind::Other => Self::internal(message),
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    /// Network attempts made before this error became terminal, 0 if none were made.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn provider(&self) -> Option<&ProviderId> {
        self.provider.as_ref()
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::UnknownProvider => "source.unknown_provider",
            SourceErrorKind::ProviderDisabled => "source.provider_disabled",
            SourceErrorKind::UnknownEndpoint => "source.unknown_endpoint",
            SourceErrorKind::MissingParameter => "source.missing_parameter",
            SourceErrorKind::AdapterNotRegistered => "source.adapter_not_registered",
            SourceErrorKind::Unauthorized => "source.unauthorized",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
            SourceErrorKind::Rejected => "source.rejected",
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

impl RetryableError for SourceError {
    fn is_transient(&self) -> bool {
        self.retryable
    }

    fn into_terminal(self, attempts: u32) -> Self {
        self.with_attempts(attempts)
    }
}

fn body_snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_SNIPPET) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_owned(),
    }
}

/// One logical call against a provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
    /// Logical cache key. Defaults to `<provider>:<endpoint>:<params>`.
    pub cache_key: Option<String>,
    pub cache_mode: CacheMode,
}

impl CallRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            cache_key: None,
            cache_mode: CacheMode::Use,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = Some(cache_key.into());
        self
    }

    pub const fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Cache key used when the caller did not choose one.
    pub fn effective_cache_key(&self, provider: &ProviderId) -> String {
        if let Some(key) = &self.cache_key {
            return key.clone();
        }

        let params = self
            .params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{provider}:{}:{params}", self.endpoint)
    }
}

/// Decoded payload of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub payload: serde_json::Value,
    pub cache_hit: bool,
    /// Network attempts made for this call; 0 on a cache hit.
    pub attempts: u32,
    pub latency_ms: u64,
}

/// Client for one registered provider.
///
/// Implementations own the full call pipeline (template resolution,
/// credentials, cache, rate limiting, retries) and must be `Send + Sync`,
/// since one client is shared by every in-flight subject aggregation.
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> &ProviderId;

    /// Catalogue entry the client was built from.
    fn config(&self) -> &ProviderConfig;

    /// Calls one endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] for unknown endpoints or missing parameters,
    /// authentication failures, transient failures once retries are spent,
    /// and undecodable responses.
    fn call<'a>(
        &'a self,
        request: CallRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResponse, SourceError>> + Send + 'a>>;

    /// Probes the provider. Never fails; problems are reported as `Unhealthy`.
    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>>;
}
