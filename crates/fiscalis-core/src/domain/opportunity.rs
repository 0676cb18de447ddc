use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ProviderId, SubjectId, Tier, UtcDateTime, ValidationError};

/// Kind of claim an opportunity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityCategory {
    /// Amount owed to the subject (recoverable tax credit, receivable).
    Credit,
    /// Amount the subject owes (registered debt, protest, bureau pendency).
    Debt,
    /// Lawsuit in which the subject is the claimant.
    JudicialClaim,
    /// Securities position held on the subject's behalf.
    Security,
}

impl OpportunityCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debt => "debt",
            Self::JudicialClaim => "judicial_claim",
            Self::Security => "security",
        }
    }
}

impl Display for OpportunityCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One provider-side record as extracted by a response mapper, before valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Provider-side identifier (inscription number, lawsuit number, protocol).
    pub reference: String,
    pub category: OpportunityCategory,
    pub nominal_value: f64,
    pub status: String,
    pub description: String,
}

impl SourceRecord {
    pub fn new(
        reference: impl Into<String>,
        category: OpportunityCategory,
        nominal_value: f64,
        status: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        if !nominal_value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: "nominal_value",
            });
        }
        if nominal_value < 0.0 {
            return Err(ValidationError::NegativeValue {
                field: "nominal_value",
            });
        }

        Ok(Self {
            reference: reference.into(),
            category,
            nominal_value,
            status: status.into(),
            description: description.into(),
        })
    }
}

/// Where an opportunity came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: ProviderId,
    pub tier: Tier,
    pub collected_at: UtcDateTime,
}

/// Normalized, valued claim derived from provider data.
///
/// Opportunities are write-once; a re-valuation produces a new instance with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub subject: SubjectId,
    pub category: OpportunityCategory,
    pub reference: String,
    pub nominal_value: f64,
    pub adjusted_value: f64,
    pub provider_name: String,
    pub status: String,
    pub priority: Priority,
    /// Likelihood of recovery, always within `0.0..=1.0`.
    pub viability: f64,
    pub resolution_horizon_months: u32,
    pub expected_resolution_at: UtcDateTime,
    pub provenance: Provenance,
}

/// Advisory pairing of a subject's credits against its debts.
///
/// The pairing is a suggestion for compensation, not a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationPairing {
    pub subject: SubjectId,
    pub credit_ids: Vec<Uuid>,
    pub debt_ids: Vec<Uuid>,
    pub credit_total: f64,
    pub debt_total: f64,
    /// `min(credit_total, debt_total)`.
    pub value: f64,
    pub economy_rate: f64,
    pub estimated_economy: f64,
}
