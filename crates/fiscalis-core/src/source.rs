//! Provider identifiers and classification enums.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_PROVIDER_ID_LEN: usize = 32;

/// Registry-unique provider identifier such as `pgfn` or `receita_federal`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyProviderId);
        }

        let valid = normalized.len() <= MAX_PROVIDER_ID_LEN
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
            && normalized
                .chars()
                .next()
                .is_some_and(|ch| ch.is_ascii_lowercase());
        if !valid {
            return Err(ValidationError::InvalidProviderId { value: normalized });
        }

        Ok(Self(normalized))
    }

    /// Built-in ids are known to be valid.
    pub(crate) fn from_static(value: &'static str) -> Self {
        debug_assert!(Self::parse(value).is_ok(), "invalid built-in provider id '{value}'");
        Self(String::from(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-case form used for environment variable names.
    pub fn env_key(&self) -> String {
        self.0.to_ascii_uppercase()
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.0
    }
}

/// Priority class grouping providers by data value and reliability.
///
/// Lower tiers rank first; `Tier1` holds the authoritative government sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl Tier {
    pub const fn rank(self) -> u8 {
        match self {
            Self::Tier1 => 1,
            Self::Tier2 => 2,
            Self::Tier3 => 3,
            Self::Tier4 => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::Tier4 => "tier4",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "tier1" => Ok(Self::Tier1),
            "2" | "tier2" => Ok(Self::Tier2),
            "3" | "tier3" => Ok(Self::Tier3),
            "4" | "tier4" => Ok(Self::Tier4),
            other => Err(format!("invalid tier '{other}', expected tier1..tier4")),
        }
    }
}

/// How a provider is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Documented JSON API.
    DirectApi,
    /// Portal access mixing API calls with scraped pages.
    Hybrid,
}

impl TransportKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DirectApi => "direct_api",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Logical query a provider endpoint answers.
///
/// Providers offering the same capability are interchangeable for fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Identity,
    DebtRegistry,
    Securities,
    CentralBank,
    JudicialClaims,
    TaxCredits,
    CreditBureau,
    NotaryProtests,
    Health,
}

impl Capability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::DebtRegistry => "debt_registry",
            Self::Securities => "securities",
            Self::CentralBank => "central_bank",
            Self::JudicialClaims => "judicial_claims",
            Self::TaxCredits => "tax_credits",
            Self::CreditBureau => "credit_bureau",
            Self::NotaryProtests => "notary_protests",
            Self::Health => "health",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
