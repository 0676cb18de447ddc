use serde::{Deserialize, Serialize};

use crate::{
    CompensationPairing, Opportunity, ProviderId, SourceRecord, SubjectId, Tier, UtcDateTime,
};

/// Outcome of one (provider, subject) collection attempt.
///
/// Produced once by the aggregation engine and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResult {
    pub provider: ProviderId,
    pub provider_name: String,
    pub tier: Tier,
    pub subject: SubjectId,
    pub success: bool,
    pub records_found: usize,
    pub value_found: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub elapsed_ms: u64,
    pub cache_hits: usize,
    pub collected_at: UtcDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<SourceRecord>,
}

impl CollectionResult {
    pub fn succeeded(
        provider: ProviderId,
        provider_name: impl Into<String>,
        tier: Tier,
        subject: SubjectId,
        records: Vec<SourceRecord>,
        cache_hits: usize,
        elapsed_ms: u64,
    ) -> Self {
        let value_found = records.iter().map(|record| record.nominal_value).sum();
        Self {
            provider,
            provider_name: provider_name.into(),
            tier,
            subject,
            success: true,
            records_found: records.len(),
            value_found,
            error: None,
            error_code: None,
            elapsed_ms,
            cache_hits,
            collected_at: UtcDateTime::now(),
            records,
        }
    }

    pub fn failed(
        provider: ProviderId,
        provider_name: impl Into<String>,
        tier: Tier,
        subject: SubjectId,
        error_code: impl Into<String>,
        error: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            provider,
            provider_name: provider_name.into(),
            tier,
            subject,
            success: false,
            records_found: 0,
            value_found: 0.0,
            error: Some(error.into()),
            error_code: Some(error_code.into()),
            elapsed_ms,
            cache_hits: 0,
            collected_at: UtcDateTime::now(),
            records: Vec::new(),
        }
    }
}

/// How much of the provider fan-out succeeded for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Coverage {
    Full,
    Partial { succeeded: usize, attempted: usize },
    Failed,
}

impl Coverage {
    pub fn from_counts(succeeded: usize, attempted: usize) -> Self {
        if attempted == 0 || succeeded == 0 {
            Self::Failed
        } else if succeeded == attempted {
            Self::Full
        } else {
            Self::Partial {
                succeeded,
                attempted,
            }
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => "fully collected",
            Self::Partial { .. } => "partially collected",
            Self::Failed => "failed",
        }
    }
}

/// Per-subject roll-up handed to the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectAggregate {
    pub subject: SubjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_source: Option<ProviderId>,
    pub results: Vec<CollectionResult>,
    pub opportunities: Vec<Opportunity>,
    pub pairings: Vec<CompensationPairing>,
    pub total_records: usize,
    pub total_value: f64,
    pub elapsed_ms: u64,
}

impl SubjectAggregate {
    pub fn new(
        subject: SubjectId,
        display_name: Option<String>,
        identity_source: Option<ProviderId>,
        results: Vec<CollectionResult>,
        opportunities: Vec<Opportunity>,
        pairings: Vec<CompensationPairing>,
        elapsed_ms: u64,
    ) -> Self {
        let total_records = results.iter().map(|result| result.records_found).sum();
        let total_value = opportunities
            .iter()
            .map(|opportunity| opportunity.nominal_value)
            .sum();
        Self {
            subject,
            display_name,
            identity_source,
            results,
            opportunities,
            pairings,
            total_records,
            total_value,
            elapsed_ms,
        }
    }

    pub fn succeeded_providers(&self) -> usize {
        self.results.iter().filter(|result| result.success).count()
    }

    pub fn coverage(&self) -> Coverage {
        Coverage::from_counts(self.succeeded_providers(), self.results.len())
    }

    pub fn result_for(&self, provider: &ProviderId) -> Option<&CollectionResult> {
        self.results
            .iter()
            .find(|result| &result.provider == provider)
    }
}
