use std::{
    fmt::Display,
    io::IsTerminal,
    path::PathBuf,
    str::FromStr,
    time::{Duration, Instant},
};

use clap::{Args, Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::{Result, WrapErr, eyre};
use reindexer_core::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, MAX_BATCH_SIZE, MigrationPlan};
use reindexer_gateway::{GatewayConfig, elasticsearch::DEFAULT_REQUEST_TIMEOUT};
use reindexer_migration::Orchestrator;
use tracing::{Level, info};
use url::Url;

use crate::{
    initializers::{cancel_on_ctrl_c, init_gateway, open_ledger},
    mapping::load_mapping,
    report::{ExitStatus, MigrationReport, emit_report},
};

pub const DEFAULT_LEDGER_PATH: &str = "reindexer-ledger.sqlite";
pub const DEFAULT_CLUSTER_URL: &str = "http://localhost:9200";
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const MAX_RETRY_BASE_DELAY_MS: u64 = 60_000;

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "reindexer",
    version,
    about = "Resumable, idempotent search index migrations"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "ledger",
        value_name = "LEDGER_PATH",
        default_value = DEFAULT_LEDGER_PATH,
        help = "SQLite file recording the progress of every migration.",
        long_help = "If the ledger is the word `memory`, progress is kept in memory and lost when the process exits.",
        help_heading = "Ledger options",
        env = "REINDEXER_LEDGER",
        global = true
    )]
    pub ledger: PathBuf,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "REINDEXER_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        help_heading = "Logging options",
        global = true
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        help_heading = "Logging options",
        env = "REINDEXER_LOG_COLOR",
        global = true
    )]
    pub log_color: LogColor,
    #[arg(
        long = "json",
        default_value_t = false,
        help = "Emit machine-readable JSON reports on stdout.",
        help_heading = "Report options",
        global = true
    )]
    pub json: bool,
    #[arg(
        long = "report-file",
        value_name = "REPORT_FILE",
        help = "Optional path to append emitted reports (JSON lines in --json mode).",
        help_heading = "Report options",
        global = true
    )]
    pub report_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClusterOptions {
    #[arg(
        long = "cluster.url",
        value_name = "URL",
        default_value = DEFAULT_CLUSTER_URL,
        help = "Base URL of the search cluster.",
        help_heading = "Cluster options",
        env = "REINDEXER_CLUSTER_URL"
    )]
    pub url: Url,
    #[arg(
        long = "cluster.username",
        value_name = "USERNAME",
        help = "Username for basic authentication.",
        help_heading = "Cluster options",
        env = "REINDEXER_USERNAME"
    )]
    pub username: Option<String>,
    #[arg(
        long = "cluster.password",
        value_name = "PASSWORD",
        help = "Password for basic authentication.",
        help_heading = "Cluster options",
        env = "REINDEXER_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,
    #[arg(
        long = "cluster.api-key",
        value_name = "API_KEY",
        help = "API key; takes precedence over basic authentication.",
        help_heading = "Cluster options",
        env = "REINDEXER_API_KEY",
        hide_env_values = true
    )]
    pub api_key: Option<String>,
    #[arg(
        long = "cluster.timeout-secs",
        value_name = "SECONDS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..=600),
        help = "Per-request timeout (1-600 seconds).",
        help_heading = "Cluster options",
        env = "REINDEXER_TIMEOUT_SECS"
    )]
    pub timeout_secs: u64,
    #[arg(
        long = "cluster.sort-field",
        value_name = "FIELD",
        help = "Field to page through the source in; shard order breaks ties.",
        long_help = "Documents sharing a value are ordered by their position in the shard, so the field need not be unique. Without it the source is paged in shard order.",
        help_heading = "Cluster options",
        env = "REINDEXER_SORT_FIELD"
    )]
    pub sort_field: Option<String>,
}

impl ClusterOptions {
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::new(self.url.clone());
        config.username = self.username.clone();
        config.password = self.password.clone();
        config.api_key = self.api_key.clone();
        config.request_timeout = Duration::from_secs(self.timeout_secs);
        config.sort_field = self.sort_field.clone();
        config
    }
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(
        name = "run",
        about = "Start a migration, or resume it from the ledger if it was interrupted"
    )]
    Run {
        #[arg(long = "source", value_name = "INDEX")]
        /// Index the documents are copied from
        source: String,
        #[arg(long = "target", value_name = "INDEX")]
        /// Index created with the new mapping
        target: String,
        #[arg(long = "alias", value_name = "ALIAS")]
        /// Alias moved from the source to the target
        alias: String,
        #[arg(long = "mapping", value_name = "MAPPING_FILE")]
        /// File whose first non-empty line is the target mapping as JSON
        mapping: PathBuf,
        #[arg(long = "mapping-type", value_name = "TYPE")]
        /// Wrap the mapping under this document type for clusters that still use typed mappings
        mapping_type: Option<String>,
        #[arg(long = "migration-id", value_name = "ID")]
        /// Identifier to resume by; derived from the index names and the current time if omitted
        migration_id: Option<String>,
        #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE as u64, value_parser = clap::value_parser!(u64).range(1..=MAX_BATCH_SIZE as u64))]
        /// Documents copied per request (1-9999, inclusive)
        batch_size: u64,
        #[arg(long = "max-retries", default_value_t = DEFAULT_MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=10))]
        /// Retries for transient cluster errors within a phase (0-10, inclusive)
        max_retries: u32,
        #[arg(long = "retry-base-delay-ms", default_value_t = DEFAULT_RETRY_BASE_DELAY_MS, value_parser = clap::value_parser!(u64).range(0..=MAX_RETRY_BASE_DELAY_MS))]
        /// Initial retry backoff delay in milliseconds (0-60000)
        retry_base_delay_ms: u64,
        #[arg(long = "failure-tolerance", default_value_t = 0)]
        /// Documents the target may reject before the migration fails
        failure_tolerance: u64,
        #[arg(long = "keep-source", default_value_t = false)]
        /// Leave the source index in place after the cutover
        keep_source: bool,
        #[arg(long = "keep-source-alias", default_value_t = false)]
        /// Add the alias to the target without removing it from the source
        keep_source_alias: bool,
        #[arg(long = "retry-failed", default_value_t = false)]
        /// Resume a failed migration from its last completed phase
        retry_failed: bool,
        #[command(flatten)]
        cluster: ClusterOptions,
    },
    #[command(name = "status", about = "Show the progress recorded for migrations")]
    Status {
        #[arg(long = "migration-id", value_name = "ID")]
        /// Only show this migration; every recorded migration otherwise
        migration_id: Option<String>,
        #[arg(long = "with-alias", default_value_t = false)]
        /// Also ask the cluster which indices each alias points to
        with_alias: bool,
        #[command(flatten)]
        cluster: ClusterOptions,
    },
    #[command(
        name = "cancel",
        about = "Ask a running migration to stop at its next checkpoint"
    )]
    Cancel {
        #[arg(long = "migration-id", value_name = "ID")]
        migration_id: String,
    },
}

impl Subcommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Status { .. } => "status",
            Self::Cancel { .. } => "cancel",
        }
    }

    pub async fn run(&self, opts: &Options, started_at: Instant) -> Result<ExitStatus> {
        match self {
            Self::Run {
                source,
                target,
                alias,
                mapping,
                mapping_type,
                migration_id,
                batch_size,
                max_retries,
                retry_base_delay_ms,
                failure_tolerance,
                keep_source,
                keep_source_alias,
                retry_failed,
                cluster,
            } => {
                let mapping = load_mapping(mapping, mapping_type.as_deref())?;
                let mut builder = MigrationPlan::builder(source, target, alias)
                    .mapping(mapping)
                    .batch_size(usize::try_from(*batch_size).wrap_err("Batch size out of range")?)
                    .max_retries(*max_retries)
                    .retry_base_delay(Duration::from_millis(*retry_base_delay_ms))
                    .failure_tolerance(*failure_tolerance)
                    .keep_source(*keep_source)
                    .remove_source_alias(!*keep_source_alias);
                if let Some(id) = migration_id {
                    builder = builder.migration_id(id);
                }
                let plan = builder.build().wrap_err("Invalid migration plan")?;
                info!(migration_id = plan.migration_id(), "Starting migration");

                let ledger = open_ledger(&opts.ledger)?;
                let gateway = init_gateway(cluster)?;
                let outcome = Orchestrator::new(gateway, ledger)
                    .with_cancellation(cancel_on_ctrl_c())
                    .retry_failed(*retry_failed)
                    .run(&plan)
                    .await
                    .wrap_err_with(|| format!("Migration `{}` stopped", plan.migration_id()))?;

                let report = MigrationReport::from_entry(outcome.entry(), started_at);
                emit_report(&report, opts.json, opts.report_file.as_deref())?;
                Ok(ExitStatus::from(&outcome))
            }
            Self::Status {
                migration_id,
                with_alias,
                cluster,
            } => {
                let ledger = open_ledger(&opts.ledger)?;
                let entries = match migration_id {
                    Some(id) => vec![
                        ledger
                            .get(id)
                            .await
                            .wrap_err("Cannot read the ledger")?
                            .ok_or_else(|| eyre!("No migration recorded with id `{id}`"))?,
                    ],
                    None => ledger.list().await.wrap_err("Cannot read the ledger")?,
                };
                let gateway = if *with_alias {
                    Some(init_gateway(cluster)?)
                } else {
                    None
                };

                if entries.is_empty() && !opts.json {
                    println!("No migrations recorded in {}", opts.ledger.display());
                }
                for entry in &entries {
                    let mut report = MigrationReport::from_entry(entry, started_at);
                    if let Some(gateway) = &gateway {
                        let bound = gateway
                            .resolve_alias(&entry.alias)
                            .await
                            .wrap_err_with(|| format!("Cannot resolve alias `{}`", entry.alias))?;
                        report.alias_binding = Some(bound);
                    }
                    emit_report(&report, opts.json, opts.report_file.as_deref())?;
                }
                Ok(ExitStatus::Success)
            }
            Self::Cancel { migration_id } => {
                let ledger = open_ledger(&opts.ledger)?;
                let entry = ledger
                    .request_cancel(migration_id)
                    .await
                    .wrap_err_with(|| format!("Cannot cancel migration `{migration_id}`"))?;
                let report = MigrationReport::from_entry(&entry, started_at);
                emit_report(&report, opts.json, opts.report_file.as_deref())?;
                Ok(ExitStatus::Success)
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl LogColor {
    pub fn enabled(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::stderr().is_terminal(),
        }
    }
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{s}'. Expected: auto, always, or never"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{CLI, LogColor, Subcommand};

    #[test]
    fn parses_a_run_with_defaults() {
        let cli = CLI::try_parse_from([
            "reindexer",
            "run",
            "--source",
            "orders_v1",
            "--target",
            "orders_v2",
            "--alias",
            "orders",
            "--mapping",
            "mapping.json",
        ])
        .expect("valid arguments");

        let Subcommand::Run {
            batch_size,
            max_retries,
            keep_source,
            cluster,
            ..
        } = cli.command
        else {
            panic!("expected the run command");
        };
        assert_eq!(batch_size, 500);
        assert_eq!(max_retries, 3);
        assert!(!keep_source);
        assert_eq!(cluster.url.as_str(), "http://localhost:9200/");
        assert_eq!(cluster.sort_field, None);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = CLI::try_parse_from([
            "reindexer",
            "status",
            "--ledger",
            "memory",
            "--json",
            "--log.color",
            "never",
        ])
        .expect("valid arguments");

        assert!(cli.opts.json);
        assert_eq!(cli.opts.ledger.to_str(), Some("memory"));
        assert!(matches!(cli.opts.log_color, LogColor::Never));
    }

    #[test]
    fn batch_size_stops_below_the_search_window() {
        let parse = |batch_size: &str| {
            CLI::try_parse_from([
                "reindexer",
                "run",
                "--source",
                "a",
                "--target",
                "b",
                "--alias",
                "c",
                "--mapping",
                "m.json",
                "--batch-size",
                batch_size,
            ])
        };
        assert!(parse("9999").is_ok());
        assert!(parse("10000").is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let result = CLI::try_parse_from([
            "reindexer",
            "run",
            "--source",
            "a",
            "--target",
            "b",
            "--alias",
            "c",
            "--mapping",
            "m.json",
            "--batch-size",
            "0",
        ]);
        assert!(result.is_err());
    }
}
