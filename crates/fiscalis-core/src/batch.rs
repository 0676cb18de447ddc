//! Batch controller: sequential phases of concurrent subject aggregations.
//!
//! Subjects are split into phases of `batch_size`. A phase runs its subjects
//! concurrently and completes only once every one of them has resolved; the
//! next phase starts after `inter_batch_delay`. No delay follows the last phase.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::aggregation::Aggregator;
use crate::events::ProgressEvent;
use crate::{Coverage, ProviderId, SubjectAggregate, SubjectId, UtcDateTime, ValidationError};

const LOG_TARGET: &str = "fiscalis::batch";

/// Per-provider totals across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTally {
    pub provider: ProviderId,
    pub name: String,
    pub succeeded: usize,
    pub failed: usize,
    pub records_found: usize,
    pub value_found: f64,
}

/// What happened to one input subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectOutcome {
    /// The id as supplied by the caller.
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub coverage: Coverage,
    pub succeeded_providers: usize,
    pub attempted_providers: usize,
    pub opportunities: usize,
    pub pairings: usize,
    pub total_value: f64,
    pub elapsed_ms: u64,
    /// Set when the subject could not be aggregated at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubjectOutcome {
    fn aggregated(input: &str, aggregate: &SubjectAggregate) -> Self {
        Self {
            input: input.to_owned(),
            subject: Some(aggregate.subject.clone()),
            display_name: aggregate.display_name.clone(),
            coverage: aggregate.coverage(),
            succeeded_providers: aggregate.succeeded_providers(),
            attempted_providers: aggregate.results.len(),
            opportunities: aggregate.opportunities.len(),
            pairings: aggregate.pairings.len(),
            total_value: aggregate.total_value,
            elapsed_ms: aggregate.elapsed_ms,
            error: None,
        }
    }

    fn rejected(input: &str, subject: Option<SubjectId>, error: String, elapsed_ms: u64) -> Self {
        Self {
            input: input.to_owned(),
            subject,
            display_name: None,
            coverage: Coverage::Failed,
            succeeded_providers: 0,
            attempted_providers: 0,
            opportunities: 0,
            pairings: 0,
            total_value: 0.0,
            elapsed_ms,
            error: Some(error),
        }
    }

    /// Whether an aggregate was produced, whatever its coverage.
    pub fn processed(&self) -> bool {
        self.error.is_none()
    }
}

/// Timing of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPhase {
    pub index: usize,
    pub subjects: usize,
    pub processed: usize,
    pub elapsed_ms: u64,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: UtcDateTime,
    pub attempted: usize,
    pub processed: usize,
    pub fully_collected: usize,
    pub partially_collected: usize,
    pub failed: usize,
    pub total_opportunities: usize,
    pub total_pairings: usize,
    pub total_value: f64,
    pub per_provider: Vec<ProviderTally>,
    pub phases: Vec<BatchPhase>,
    pub elapsed_ms: u64,
    pub outcomes: Vec<SubjectOutcome>,
}

#[derive(Default)]
struct Totals {
    outcomes: Vec<SubjectOutcome>,
    per_provider: BTreeMap<ProviderId, ProviderTally>,
}

impl Totals {
    fn record(&mut self, input: &str, aggregate: &SubjectAggregate) {
        for result in &aggregate.results {
            let tally = self
                .per_provider
                .entry(result.provider.clone())
                .or_insert_with(|| ProviderTally {
                    provider: result.provider.clone(),
                    name: result.provider_name.clone(),
                    succeeded: 0,
                    failed: 0,
                    records_found: 0,
                    value_found: 0.0,
                });
            if result.success {
                tally.succeeded += 1;
                tally.records_found += result.records_found;
                tally.value_found += result.value_found;
            } else {
                tally.failed += 1;
            }
        }
        self.outcomes.push(SubjectOutcome::aggregated(input, aggregate));
    }

    fn finish(self, run_id: Uuid, started_at: UtcDateTime, phases: Vec<BatchPhase>, elapsed_ms: u64) -> BatchSummary {
        let count = |coverage: fn(&Coverage) -> bool| {
            self.outcomes
                .iter()
                .filter(|outcome| outcome.processed() && coverage(&outcome.coverage))
                .count()
        };
        let fully_collected = count(|coverage| matches!(coverage, Coverage::Full));
        let partially_collected = count(|coverage| matches!(coverage, Coverage::Partial { .. }));
        let processed = self.outcomes.iter().filter(|outcome| outcome.processed()).count();

        BatchSummary {
            run_id,
            started_at,
            attempted: self.outcomes.len(),
            processed,
            fully_collected,
            partially_collected,
            failed: self.outcomes.len() - fully_collected - partially_collected,
            total_opportunities: self.outcomes.iter().map(|outcome| outcome.opportunities).sum(),
            total_pairings: self.outcomes.iter().map(|outcome| outcome.pairings).sum(),
            total_value: self.outcomes.iter().map(|outcome| outcome.total_value).sum(),
            per_provider: self.per_provider.into_values().collect(),
            phases,
            elapsed_ms,
            outcomes: self.outcomes,
        }
    }
}

enum SubjectRun {
    Aggregated(SubjectAggregate),
    Rejected(SubjectOutcome),
}

pub(crate) async fn run(
    aggregator: &Aggregator,
    subjects: &[String],
    batch_size: usize,
    inter_batch_delay: Duration,
) -> Result<BatchSummary, ValidationError> {
    if batch_size == 0 {
        return Err(ValidationError::ZeroBatchSize);
    }

    let run_id = Uuid::new_v4();
    let started = Instant::now();
    let started_at = UtcDateTime::now();
    let chunks = subjects.chunks(batch_size).collect::<Vec<_>>();
    let of = chunks.len();
    let events = aggregator.events();

    log::info!(
        target: LOG_TARGET,
        "run {run_id}: {} subject(s) in {of} batch(es) of up to {batch_size}",
        subjects.len()
    );
    events.publish(ProgressEvent::RunStarted {
        run_id,
        subjects: subjects.len(),
        batches: of,
    });

    let mut totals = Totals::default();
    let mut phases = Vec::with_capacity(of);
    for (index, chunk) in chunks.into_iter().enumerate() {
        if index > 0 && !inter_batch_delay.is_zero() {
            log::debug!(
                target: LOG_TARGET,
                "waiting {} ms before batch {}/{of}",
                inter_batch_delay.as_millis(),
                index + 1
            );
            tokio::time::sleep(inter_batch_delay).await;
        }

        let phase_started = Instant::now();
        events.publish(ProgressEvent::BatchStarted {
            run_id,
            index,
            of,
            size: chunk.len(),
        });

        let runs = join_all(chunk.iter().map(|input| run_subject(aggregator, input))).await;
        let mut processed = 0;
        for (input, run) in chunk.iter().zip(runs) {
            match run {
                SubjectRun::Aggregated(aggregate) => {
                    processed += 1;
                    totals.record(input, &aggregate);
                }
                SubjectRun::Rejected(outcome) => {
                    log::warn!(
                        target: LOG_TARGET,
                        "subject '{input}' skipped: {}",
                        outcome.error.as_deref().unwrap_or_default()
                    );
                    totals.outcomes.push(outcome);
                }
            }
        }

        let phase = BatchPhase {
            index,
            subjects: chunk.len(),
            processed,
            elapsed_ms: elapsed_ms(phase_started),
        };
        events.publish(ProgressEvent::BatchCompleted {
            run_id,
            index,
            of,
            processed,
            elapsed_ms: phase.elapsed_ms,
        });
        phases.push(phase);
    }

    let summary = totals.finish(run_id, started_at, phases, elapsed_ms(started));
    events.publish(ProgressEvent::RunCompleted {
        run_id,
        attempted: summary.attempted,
        processed: summary.processed,
        total_opportunities: summary.total_opportunities,
        total_value: summary.total_value,
        elapsed_ms: summary.elapsed_ms,
    });
    log::info!(
        target: LOG_TARGET,
        "run {run_id}: {}/{} processed ({} full, {} partial, {} failed) in {} ms",
        summary.processed,
        summary.attempted,
        summary.fully_collected,
        summary.partially_collected,
        summary.failed,
        summary.elapsed_ms
    );
    Ok(summary)
}

async fn run_subject(aggregator: &Aggregator, input: &str) -> SubjectRun {
    let started = Instant::now();
    let subject = match SubjectId::parse(input) {
        Ok(subject) => subject,
        Err(error) => {
            return SubjectRun::Rejected(SubjectOutcome::rejected(
                input,
                None,
                error.to_string(),
                0,
            ));
        }
    };

    let outcome = AssertUnwindSafe(aggregator.collect_for_subject(&subject))
        .catch_unwind()
        .await;
    match outcome {
        Ok(aggregate) => SubjectRun::Aggregated(aggregate),
        Err(_) => SubjectRun::Rejected(SubjectOutcome::rejected(
            input,
            Some(subject),
            String::from("aggregation panicked"),
            elapsed_ms(started),
        )),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
