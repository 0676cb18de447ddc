use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use fiscalis_core::Aggregator;

use crate::cli::{BatchArgs, Cli};
use crate::error::CliError;
use crate::output;

use super::EXIT_INCOMPLETE;

pub async fn run(args: &BatchArgs, aggregator: &Aggregator, cli: &Cli) -> Result<ExitCode, CliError> {
    let mut subjects = args.subjects.clone();
    if let Some(path) = &args.file {
        subjects.extend(read_subject_file(path)?);
    }
    if subjects.is_empty() {
        return Err(CliError::Command(String::from(
            "no subjects given; pass ids or --file",
        )));
    }

    let config = aggregator.config();
    let batch_size = args.batch_size.unwrap_or(config.batch_size);
    let delay = args
        .delay_ms
        .map_or(config.inter_batch_delay, Duration::from_millis);

    let summary = aggregator.collect_batch(&subjects, batch_size, delay).await?;
    output::render(&summary, cli.format, cli.pretty, output::batch_table)?;

    if summary.failed > 0 || summary.processed < summary.attempted {
        return Ok(ExitCode::from(EXIT_INCOMPLETE));
    }
    Ok(ExitCode::SUCCESS)
}

/// One subject per line. Blank lines and lines starting with `#` are skipped.
fn read_subject_file(path: &Path) -> Result<Vec<String>, CliError> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_subject_lines(&content))
}

fn parse_subject_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}
