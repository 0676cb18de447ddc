mod batch;
mod collect;
mod health;
mod providers;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use fiscalis_core::{spawn_sink, Aggregator, AggregatorConfig, Catalog, LogNotificationSink, ProviderId};

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::store::NdjsonRecordStore;

const LOG_TARGET: &str = "fiscalis::cli";

/// Exit code for runs that completed but collected nothing for some input.
pub const EXIT_INCOMPLETE: u8 = 3;

pub async fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let aggregator = build_aggregator(cli)?;
    let sink = spawn_sink(aggregator.subscribe(), Arc::new(LogNotificationSink));

    let outcome = match &cli.command {
        Command::Collect(args) => collect::run(args, &aggregator, cli).await,
        Command::Batch(args) => batch::run(args, &aggregator, cli).await,
        Command::Providers(args) => providers::run(args, &aggregator, cli),
        Command::Health => health::run(&aggregator, cli).await,
    };

    // Dropping the aggregator closes the event channel so the sink drains and exits.
    drop(aggregator);
    if let Err(error) = sink.await {
        log::debug!(target: LOG_TARGET, "notification sink ended abnormally: {error}");
    }

    outcome
}

fn build_aggregator(cli: &Cli) -> Result<Aggregator, CliError> {
    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin(),
    };

    let mut config = if cli.simulate {
        AggregatorConfig::simulated()
    } else {
        AggregatorConfig::default()
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        if timeout_ms == 0 {
            return Err(CliError::Command(String::from(
                "--timeout-ms must be greater than zero",
            )));
        }
        config = config.with_provider_timeout(Duration::from_millis(timeout_ms));
    }

    let mut builder = Aggregator::builder()
        .with_catalog(catalog)
        .with_config(config);
    if let Some(path) = &cli.out {
        builder = builder.with_store(Arc::new(NdjsonRecordStore::open(path)?));
    }
    let aggregator = builder.build()?;

    for raw in &cli.disabled {
        let id = ProviderId::parse(raw)?;
        if !aggregator.toggle_provider(&id, false) {
            return Err(CliError::Command(format!("cannot disable unknown provider '{id}'")));
        }
    }

    Ok(aggregator)
}
