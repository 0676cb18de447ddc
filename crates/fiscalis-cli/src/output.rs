//! Rendering of command results as JSON or aligned text.

use std::fmt::Write as _;

use fiscalis_core::{BatchSummary, HealthReport, ProviderConfig, SubjectAggregate};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Prints `value` to stdout in `format`. `table` renders the text form.
pub fn render<T: Serialize>(
    value: &T,
    format: OutputFormat,
    pretty: bool,
    table: impl FnOnce(&T) -> String,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(value)?
            } else {
                serde_json::to_string(value)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => print!("{}", table(value)),
    }
    Ok(())
}

fn money(value: f64) -> String {
    format!("R$ {value:.2}")
}

pub fn aggregate_table(aggregate: &SubjectAggregate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "subject       : {}", aggregate.subject);
    let _ = writeln!(
        out,
        "name          : {}",
        aggregate.display_name.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out, "coverage      : {}", aggregate.coverage().label());
    let _ = writeln!(out, "records       : {}", aggregate.total_records);
    let _ = writeln!(out, "total value   : {}", money(aggregate.total_value));
    let _ = writeln!(out, "elapsed       : {} ms", aggregate.elapsed_ms);

    let _ = writeln!(out, "\nproviders:");
    for result in &aggregate.results {
        let status = if result.success { "ok" } else { "failed" };
        let _ = write!(
            out,
            "  {:<18} {:<6} {:<7} {:>4} rec {:>18} {:>6} ms",
            result.provider.as_str(),
            result.tier.as_str(),
            status,
            result.records_found,
            money(result.value_found),
            result.elapsed_ms,
        );
        if let Some(error) = &result.error {
            let _ = write!(out, "  {error}");
        }
        out.push('\n');
    }

    if !aggregate.opportunities.is_empty() {
        let _ = writeln!(out, "\nopportunities:");
        for opportunity in &aggregate.opportunities {
            let _ = writeln!(
                out,
                "  {:<15} {:<8} {:>18} {:>18}  {} ({})",
                opportunity.category.to_string(),
                opportunity.priority.as_str(),
                money(opportunity.nominal_value),
                money(opportunity.adjusted_value),
                opportunity.reference,
                opportunity.provenance.source_id,
            );
        }
    }

    if !aggregate.pairings.is_empty() {
        let _ = writeln!(out, "\ncompensations:");
        for pairing in &aggregate.pairings {
            let _ = writeln!(
                out,
                "  offset {} of credits {} against debts {}, economy {}",
                money(pairing.value),
                money(pairing.credit_total),
                money(pairing.debt_total),
                money(pairing.estimated_economy),
            );
        }
    }
    out
}

pub fn batch_table(summary: &BatchSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run           : {}", summary.run_id);
    let _ = writeln!(out, "started       : {}", summary.started_at);
    let _ = writeln!(
        out,
        "subjects      : {} attempted, {} processed",
        summary.attempted, summary.processed
    );
    let _ = writeln!(
        out,
        "coverage      : {} full, {} partial, {} failed",
        summary.fully_collected, summary.partially_collected, summary.failed
    );
    let _ = writeln!(
        out,
        "opportunities : {} ({} compensations)",
        summary.total_opportunities, summary.total_pairings
    );
    let _ = writeln!(out, "total value   : {}", money(summary.total_value));
    let _ = writeln!(
        out,
        "elapsed       : {} ms in {} phase(s)",
        summary.elapsed_ms,
        summary.phases.len()
    );

    if !summary.per_provider.is_empty() {
        let _ = writeln!(out, "\nproviders:");
        for tally in &summary.per_provider {
            let _ = writeln!(
                out,
                "  {:<18} {:>4} ok {:>4} failed {:>6} rec {:>18}",
                tally.provider.as_str(),
                tally.succeeded,
                tally.failed,
                tally.records_found,
                money(tally.value_found),
            );
        }
    }

    let _ = writeln!(out, "\nsubjects:");
    for outcome in &summary.outcomes {
        match &outcome.error {
            Some(error) => {
                let _ = writeln!(out, "  {:<18} error: {error}", outcome.input);
            }
            None => {
                let _ = writeln!(
                    out,
                    "  {:<18} {:<20} {:>3}/{:<3} {:>4} opp {:>18}",
                    outcome.input,
                    outcome.coverage.label(),
                    outcome.succeeded_providers,
                    outcome.attempted_providers,
                    outcome.opportunities,
                    money(outcome.total_value),
                );
            }
        }
    }
    out
}

pub fn providers_table(providers: &[ProviderConfig]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<18} {:<6} {:<8} {:>8} {:<11} name",
        "id", "tier", "enabled", "priority", "transport"
    );
    for provider in providers {
        let _ = writeln!(
            out,
            "{:<18} {:<6} {:<8} {:>8} {:<11} {}",
            provider.id.as_str(),
            provider.tier.as_str(),
            if provider.enabled { "yes" } else { "no" },
            provider.priority,
            provider.transport.as_str(),
            provider.name,
        );
    }
    out
}

pub fn health_table(reports: &[HealthReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let _ = write!(
            out,
            "{:<18} {:<10} {:>6} ms  rate {}",
            report.provider.as_str(),
            report.state.as_str(),
            report.response_time_ms,
            if report.rate_available { "available" } else { "exhausted" },
        );
        if let Some(detail) = &report.detail {
            let _ = write!(out, "  {detail}");
        }
        out.push('\n');
    }
    out
}
