use thiserror::Error;

/// Validation and contract errors exposed by `fiscalis-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("subject id cannot be empty")]
    EmptySubject,
    #[error("subject id contains invalid character '{ch}' at index {index}")]
    SubjectInvalidChar { ch: char, index: usize },
    #[error("subject id must have 11 (CPF) or 14 (CNPJ) digits, got {len}")]
    SubjectLength { len: usize },

    #[error("provider id cannot be empty")]
    EmptyProviderId,
    #[error("provider id '{value}' may only contain lowercase ASCII letters, digits and '_'")]
    InvalidProviderId { value: String },
    #[error("duplicate provider id '{id}' in catalog")]
    DuplicateProvider { id: String },
    #[error("provider '{provider}' declares endpoint '{endpoint}' more than once")]
    DuplicateEndpoint { provider: String, endpoint: String },
    #[error("provider '{provider}' must declare at least one endpoint")]
    NoEndpoints { provider: String },
    #[error("provider '{provider}' health endpoint '{endpoint}' is not declared")]
    UnknownHealthEndpoint { provider: String, endpoint: String },
    #[error("path template '{template}' is malformed: {reason}")]
    MalformedTemplate { template: String, reason: String },
    #[error("endpoint '{endpoint}' uses placeholder '{placeholder}' that is not a declared parameter")]
    UndeclaredPlaceholder {
        endpoint: String,
        placeholder: String,
    },
    #[error("provider '{provider}' base url must start with http:// or https://")]
    InvalidBaseUrl { provider: String },
    #[error("rate limit window '{window}' of provider '{provider}' must allow at least one request")]
    ZeroRateLimit {
        provider: String,
        window: &'static str,
    },
    #[error("retry policy must allow at least one attempt")]
    ZeroAttempts,

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
