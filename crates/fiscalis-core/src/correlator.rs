//! Opportunity correlation: values provider records and proposes compensation pairings.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    CollectionResult, CompensationPairing, Opportunity, OpportunityCategory, Priority, Provenance,
    SourceRecord, SubjectId, Tier,
};

const LOG_TARGET: &str = "fiscalis::correlator";

const DAYS_PER_MONTH: i64 = 30;

/// Valuation applied to one record category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryRule {
    pub priority: Priority,
    /// Raised priority once the nominal value reaches `escalation_threshold`.
    pub escalated_priority: Priority,
    pub escalation_threshold: f64,
    pub viability: f64,
    pub horizon_months: u32,
    /// Share of the nominal value expected to be realised.
    pub recovery_rate: f64,
}

impl CategoryRule {
    pub fn for_category(category: OpportunityCategory) -> Self {
        match category {
            OpportunityCategory::Debt => Self {
                priority: Priority::High,
                escalated_priority: Priority::Critical,
                escalation_threshold: 1_000_000.0,
                viability: 0.85,
                horizon_months: 6,
                recovery_rate: 1.0,
            },
            OpportunityCategory::Credit => Self {
                priority: Priority::Medium,
                escalated_priority: Priority::High,
                escalation_threshold: 500_000.0,
                viability: 0.75,
                horizon_months: 12,
                recovery_rate: 0.95,
            },
            OpportunityCategory::JudicialClaim => Self {
                priority: Priority::Low,
                escalated_priority: Priority::Medium,
                escalation_threshold: 1_000_000.0,
                viability: 0.45,
                horizon_months: 48,
                recovery_rate: 0.6,
            },
            OpportunityCategory::Security => Self {
                priority: Priority::Medium,
                escalated_priority: Priority::Medium,
                escalation_threshold: f64::INFINITY,
                viability: 0.6,
                horizon_months: 18,
                recovery_rate: 0.8,
            },
        }
    }

    pub fn priority_for(&self, nominal_value: f64) -> Priority {
        if nominal_value >= self.escalation_threshold {
            self.escalated_priority
        } else {
            self.priority
        }
    }
}

/// Tunables for cross-provider pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairingRules {
    /// Smallest `min(credit, debt) / max(credit, debt)` considered comparable.
    pub min_ratio: f64,
    /// Estimated saving as a share of the paired value.
    pub economy_rate: f64,
}

impl Default for PairingRules {
    fn default() -> Self {
        Self {
            min_ratio: 0.1,
            economy_rate: 0.20,
        }
    }
}

/// Opportunities and pairings derived for one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    pub opportunities: Vec<Opportunity>,
    pub pairings: Vec<CompensationPairing>,
}

/// Turns successful collection results into valued opportunities.
#[derive(Debug, Clone, Copy, Default)]
pub struct Correlator {
    pairing: PairingRules,
}

impl Correlator {
    pub fn new(pairing: PairingRules) -> Self {
        Self { pairing }
    }

    pub fn correlate(&self, subject: &SubjectId, results: &[CollectionResult]) -> Correlation {
        let opportunities = self.opportunities(subject, results);
        let pairings = self.pairing(subject, &opportunities).into_iter().collect();
        Correlation {
            opportunities,
            pairings,
        }
    }

    /// One opportunity per distinct `(category, reference)` across successful results.
    ///
    /// When several providers report the same reference, the record from the
    /// best tier wins; ties go to the lower provider id, so the outcome does
    /// not depend on the order results arrived in.
    pub fn opportunities(&self, subject: &SubjectId, results: &[CollectionResult]) -> Vec<Opportunity> {
        let mut ordered = results
            .iter()
            .filter(|result| result.success && &result.subject == subject)
            .collect::<Vec<_>>();
        ordered.sort_by(|left, right| {
            left.tier
                .cmp(&right.tier)
                .then_with(|| left.provider.cmp(&right.provider))
        });

        let mut seen = HashMap::new();
        let mut opportunities = Vec::new();
        for result in ordered {
            for record in &result.records {
                let key = (record.category, record.reference.clone());
                if let Some(owner) = seen.get(&key) {
                    log::debug!(
                        target: LOG_TARGET,
                        "'{}' {} already reported by '{owner}', skipping '{}'",
                        record.reference,
                        record.category,
                        result.provider
                    );
                    continue;
                }
                let _ = seen.insert(key, result.provider.clone());
                opportunities.push(value_record(subject, result, record));
            }
        }
        opportunities
    }

    /// Advisory credit/debt offset when both sides exist with comparable totals.
    pub fn pairing(&self, subject: &SubjectId, opportunities: &[Opportunity]) -> Option<CompensationPairing> {
        let side = |category: OpportunityCategory| {
            opportunities
                .iter()
                .filter(move |opportunity| opportunity.category == category && opportunity.nominal_value > 0.0)
        };
        let credits = side(OpportunityCategory::Credit).collect::<Vec<_>>();
        let debts = side(OpportunityCategory::Debt).collect::<Vec<_>>();
        let credit_total = credits.iter().map(|opportunity| opportunity.nominal_value).sum::<f64>();
        let debt_total = debts.iter().map(|opportunity| opportunity.nominal_value).sum::<f64>();

        if credit_total <= 0.0 || debt_total <= 0.0 {
            return None;
        }
        let value = credit_total.min(debt_total);
        if value / credit_total.max(debt_total) < self.pairing.min_ratio {
            log::debug!(
                target: LOG_TARGET,
                "'{subject}' credits {credit_total:.2} and debts {debt_total:.2} are not comparable"
            );
            return None;
        }

        log::info!(
            target: LOG_TARGET,
            "'{subject}' compensation pairing of {value:.2} proposed"
        );
        Some(CompensationPairing {
            subject: subject.clone(),
            credit_ids: credits.iter().map(|opportunity| opportunity.id).collect(),
            debt_ids: debts.iter().map(|opportunity| opportunity.id).collect(),
            credit_total,
            debt_total,
            value,
            economy_rate: self.pairing.economy_rate,
            estimated_economy: value * self.pairing.economy_rate,
        })
    }
}

fn value_record(subject: &SubjectId, result: &CollectionResult, record: &SourceRecord) -> Opportunity {
    let rule = CategoryRule::for_category(record.category);
    let viability = (rule.viability + tier_adjustment(result.tier)).clamp(0.0, 1.0);

    Opportunity {
        id: Uuid::new_v4(),
        subject: subject.clone(),
        category: record.category,
        reference: record.reference.clone(),
        nominal_value: record.nominal_value,
        adjusted_value: record.nominal_value * rule.recovery_rate,
        provider_name: result.provider_name.clone(),
        status: record.status.clone(),
        priority: rule.priority_for(record.nominal_value),
        viability,
        resolution_horizon_months: rule.horizon_months,
        expected_resolution_at: result
            .collected_at
            .plus_days(i64::from(rule.horizon_months) * DAYS_PER_MONTH),
        provenance: Provenance {
            source_id: result.provider.clone(),
            tier: result.tier,
            collected_at: result.collected_at,
        },
    }
}

fn tier_adjustment(tier: Tier) -> f64 {
    match tier {
        Tier::Tier1 => 0.05,
        Tier::Tier2 => 0.0,
        Tier::Tier3 | Tier::Tier4 => -0.05,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderId;

    fn subject() -> SubjectId {
        SubjectId::parse("12345678000190").expect("valid cnpj")
    }

    fn record(reference: &str, category: OpportunityCategory, value: f64) -> SourceRecord {
        SourceRecord::new(reference, category, value, "ativo", "test record").expect("valid record")
    }

    fn result(provider: &str, tier: Tier, records: Vec<SourceRecord>) -> CollectionResult {
        CollectionResult::succeeded(
            ProviderId::parse(provider).expect("valid id"),
            provider.to_uppercase(),
            tier,
            subject(),
            records,
            0,
            10,
        )
    }

    #[test]
    fn debts_and_credits_pair_at_the_smaller_total() {
        let results = vec![
            result(
                "pgfn",
                Tier::Tier1,
                vec![
                    record("80.6.21.000001-01", OpportunityCategory::Debt, 100_000.0),
                    record("80.6.21.000001-02", OpportunityCategory::Debt, 200_000.0),
                ],
            ),
            result(
                "cvm",
                Tier::Tier2,
                vec![record("CVM-1", OpportunityCategory::Credit, 200_000.0)],
            ),
        ];

        let correlation = Correlator::default().correlate(&subject(), &results);

        assert_eq!(correlation.opportunities.len(), 3);
        assert_eq!(correlation.pairings.len(), 1);
        let pairing = &correlation.pairings[0];
        assert_eq!(pairing.value, 200_000.0);
        assert_eq!(pairing.credit_total, 200_000.0);
        assert_eq!(pairing.debt_total, 300_000.0);
        assert_eq!(pairing.debt_ids.len(), 2);
        assert!((pairing.estimated_economy - 40_000.0).abs() < 1e-6);
    }

    #[test]
    fn category_rules_drive_priority_and_horizon() {
        let results = vec![result(
            "datajud",
            Tier::Tier2,
            vec![
                record("0001", OpportunityCategory::JudicialClaim, 50_000.0),
                record("0002", OpportunityCategory::JudicialClaim, 1_500_000.0),
            ],
        )];

        let opportunities = Correlator::default().opportunities(&subject(), &results);

        assert_eq!(opportunities[0].priority, Priority::Low);
        assert_eq!(opportunities[1].priority, Priority::Medium);
        assert_eq!(opportunities[0].resolution_horizon_months, 48);
        assert!((opportunities[0].adjusted_value - 30_000.0).abs() < 1e-6);
        assert!(opportunities[0].viability < CategoryRule::for_category(OpportunityCategory::Debt).viability);
    }

    #[test]
    fn failed_results_yield_nothing() {
        let failed = CollectionResult::failed(
            ProviderId::parse("serasa").expect("valid id"),
            "Serasa",
            Tier::Tier3,
            subject(),
            "source.unavailable",
            "down",
            5,
        );

        let correlation = Correlator::default().correlate(&subject(), &[failed]);

        assert_eq!(correlation, Correlation::default());
    }

    #[test]
    fn duplicate_references_keep_the_best_tier_regardless_of_order() {
        let shared = || vec![record("PROT-1", OpportunityCategory::Debt, 900.0)];
        let forward = vec![
            result("ieptb", Tier::Tier3, shared()),
            result("pgfn", Tier::Tier1, shared()),
        ];
        let reversed = forward.iter().rev().cloned().collect::<Vec<_>>();

        for results in [forward, reversed] {
            let opportunities = Correlator::default().opportunities(&subject(), &results);
            assert_eq!(opportunities.len(), 1);
            assert_eq!(opportunities[0].provenance.source_id.as_str(), "pgfn");
            assert!((opportunities[0].viability - 0.9).abs() < 1e-9);
        }
    }

    #[test]
    fn lopsided_totals_are_not_paired() {
        let results = vec![result(
            "sefaz",
            Tier::Tier2,
            vec![
                record("ICMS-1", OpportunityCategory::Credit, 1_000.0),
                record("DEBT-1", OpportunityCategory::Debt, 1_000_000.0),
            ],
        )];

        let correlation = Correlator::default().correlate(&subject(), &results);

        assert!(correlation.pairings.is_empty());
    }
}
