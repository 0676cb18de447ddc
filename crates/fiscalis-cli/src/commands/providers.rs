use std::process::ExitCode;

use fiscalis_core::{Aggregator, ProviderFilter, Tier};

use crate::cli::{Cli, ProvidersArgs};
use crate::error::CliError;
use crate::output;

pub fn run(args: &ProvidersArgs, aggregator: &Aggregator, cli: &Cli) -> Result<ExitCode, CliError> {
    let filter = filter_for(args)?;
    let providers = aggregator.list_providers(&filter);
    output::render(&providers, cli.format, cli.pretty, |providers| {
        output::providers_table(providers)
    })?;
    Ok(ExitCode::SUCCESS)
}

fn filter_for(args: &ProvidersArgs) -> Result<ProviderFilter, CliError> {
    let mut filter = ProviderFilter::all();
    if let Some(raw) = &args.tier {
        let tier = raw.parse::<Tier>().map_err(CliError::Command)?;
        filter = filter.with_tier(tier);
    }
    if args.enabled {
        filter = filter.with_enabled(true);
    }
    Ok(filter)
}
