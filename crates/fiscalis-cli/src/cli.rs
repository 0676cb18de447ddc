//! CLI argument definitions for fiscalis.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `collect` | Aggregate one subject across every enabled provider |
//! | `batch` | Aggregate many subjects in paced phases |
//! | `providers` | List registered providers |
//! | `health` | Probe every registered provider |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--catalog` | builtin | Provider catalogue JSON file |
//! | `--simulate` | `false` | Use simulated clients for every provider |
//! | `--disable` | none | Provider id to disable (repeatable) |
//! | `--timeout-ms` | per provider | Per-provider timeout for one subject |
//! | `--out` | none | Append every aggregate to an NDJSON file |
//! | `--log-level` | `warn` | Log verbosity; `RUST_LOG` wins when set |
//!
//! # Examples
//!
//! ```bash
//! fiscalis --simulate collect 12.345.678/0001-90 --pretty
//! fiscalis batch --file subjects.txt --batch-size 20 --out results.ndjson
//! fiscalis providers --tier 1 --format table
//! fiscalis --catalog providers.json health
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Tax-credit recovery aggregation over Brazilian data providers.
#[derive(Debug, Parser)]
#[command(
    name = "fiscalis",
    author,
    version,
    about = "Tax-credit recovery aggregation over Brazilian data providers",
    long_about = "fiscalis queries federal, state, judicial and private data providers for a \
CPF or CNPJ, normalizes what they report into valued opportunities and proposes \
credit/debt compensations.\n\
\n\
Credentials are read from FISCALIS_<PROVIDER>_CREDENTIAL and FISCALIS_<PROVIDER>_SECRET.\n\
\n\
Use 'fiscalis <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Provider catalogue file. The builtin catalogue is used when omitted.
    #[arg(long, global = true, env = "FISCALIS_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Serve every provider from the deterministic simulator.
    #[arg(long, global = true, default_value_t = false)]
    pub simulate: bool,

    /// Provider id to disable for this run. Repeatable.
    #[arg(long = "disable", global = true, value_name = "PROVIDER")]
    pub disabled: Vec<String>,

    /// Per-provider timeout in milliseconds for one subject.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Append every subject aggregate to this NDJSON file.
    #[arg(long, global = true)]
    pub out: Option<PathBuf>,

    /// Log verbosity.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table for terminal display.
    Table,
    /// Single JSON document.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Aggregate one subject across every enabled provider.
    ///
    /// # Examples
    ///
    ///   fiscalis collect 12345678000190
    ///   fiscalis --simulate collect 529.982.247-25 --format table
    Collect(CollectArgs),

    /// Aggregate many subjects in sequential phases of concurrent subjects.
    ///
    /// Subjects come from the command line, a file (one per line), or both.
    ///
    /// # Examples
    ///
    ///   fiscalis batch 12345678000190 52998224725
    ///   fiscalis batch --file subjects.txt --batch-size 20 --delay-ms 5000
    Batch(BatchArgs),

    /// List registered providers.
    Providers(ProvidersArgs),

    /// Probe every registered provider.
    Health,
}

/// Arguments for the `collect` command.
#[derive(Debug, Args)]
pub struct CollectArgs {
    /// CPF (11 digits) or CNPJ (14 digits); punctuation is ignored.
    pub subject: String,
}

/// Arguments for the `batch` command.
#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Subject ids.
    pub subjects: Vec<String>,

    /// File with one subject per line. Blank lines and `#` comments are skipped.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Subjects processed concurrently per phase.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between phases in milliseconds.
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

/// Arguments for the `providers` command.
#[derive(Debug, Args)]
pub struct ProvidersArgs {
    /// Only providers of this tier (1-4).
    #[arg(long)]
    pub tier: Option<String>,

    /// Only enabled providers.
    #[arg(long, default_value_t = false)]
    pub enabled: bool,
}
