use std::process::ExitCode;

use fiscalis_core::Aggregator;

use crate::cli::Cli;
use crate::error::CliError;
use crate::output;

use super::EXIT_INCOMPLETE;

pub async fn run(aggregator: &Aggregator, cli: &Cli) -> Result<ExitCode, CliError> {
    let reports = aggregator.health_check().await;
    output::render(&reports, cli.format, cli.pretty, |reports| {
        output::health_table(reports)
    })?;

    if reports.iter().any(|report| report.enabled && !report.healthy) {
        return Ok(ExitCode::from(EXIT_INCOMPLETE));
    }
    Ok(ExitCode::SUCCESS)
}
