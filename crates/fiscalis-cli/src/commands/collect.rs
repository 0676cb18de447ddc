use std::process::ExitCode;

use fiscalis_core::{Aggregator, Coverage, SubjectId};

use crate::cli::{Cli, CollectArgs};
use crate::error::CliError;
use crate::output;

use super::EXIT_INCOMPLETE;

pub async fn run(args: &CollectArgs, aggregator: &Aggregator, cli: &Cli) -> Result<ExitCode, CliError> {
    let subject = SubjectId::parse(&args.subject)?;

    let aggregate = aggregator.collect_for_subject(&subject).await;
    output::render(&aggregate, cli.format, cli.pretty, output::aggregate_table)?;

    if aggregate.coverage() == Coverage::Failed {
        return Ok(ExitCode::from(EXIT_INCOMPLETE));
    }
    Ok(ExitCode::SUCCESS)
}
