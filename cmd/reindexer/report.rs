use std::{
    fs::OpenOptions,
    io::Write,
    path::Path,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use eyre::{Result, WrapErr};
use reindexer_core::{LedgerEntry, MigrationPhase};
use reindexer_gateway::{GatewayError, RetryFailure};
use reindexer_ledger::LedgerError;
use reindexer_migration::{MigrationOutcome, OrchestratorError};
use serde::Serialize;

pub const REPORT_SCHEMA_VERSION: u32 = 1;
pub const USAGE_ERROR_EXIT_CODE: i32 = 1;

/// Process exit status for a command that ran to an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    FailedRetryable,
    FailedTerminal,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::FailedRetryable => 2,
            Self::FailedTerminal => 3,
            Self::Cancelled => 4,
        }
    }
}

impl From<&MigrationOutcome> for ExitStatus {
    fn from(outcome: &MigrationOutcome) -> Self {
        match outcome {
            MigrationOutcome::Complete(_) => Self::Success,
            MigrationOutcome::Failed {
                retryable: true, ..
            } => Self::FailedRetryable,
            MigrationOutcome::Failed { .. } => Self::FailedTerminal,
            MigrationOutcome::Cancelled(_) => Self::Cancelled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub schema_version: u32,
    pub status: &'static str,
    pub migration_id: String,
    pub phase: MigrationPhase,
    pub last_completed_phase: MigrationPhase,
    pub source_index: String,
    pub target_index: String,
    pub alias: String,
    pub documents_copied: u64,
    pub documents_failed: u64,
    pub retryable: Option<bool>,
    /// For failed migrations, whether the alias and source were never touched.
    pub source_untouched: Option<bool>,
    pub error_detail: Option<String>,
    pub cancel_requested: bool,
    pub updated_at_unix: u64,
    /// Indices the alias currently resolves to, when the cluster was asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_binding: Option<Vec<String>>,
    pub elapsed_ms: u64,
}

impl MigrationReport {
    pub fn from_entry(entry: &LedgerEntry, started_at: Instant) -> Self {
        let status = match entry.phase {
            MigrationPhase::Complete => "complete",
            MigrationPhase::Failed if entry.is_cancelled() => "cancelled",
            MigrationPhase::Failed => "failed",
            _ => "in_progress",
        };
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            status,
            migration_id: entry.migration_id.clone(),
            phase: entry.phase,
            last_completed_phase: entry.last_completed_phase,
            source_index: entry.source_index.clone(),
            target_index: entry.target_index.clone(),
            alias: entry.alias.clone(),
            documents_copied: entry.documents_copied_count,
            documents_failed: entry.documents_failed_count,
            retryable: (entry.phase == MigrationPhase::Failed).then_some(entry.retryable),
            source_untouched: (entry.phase == MigrationPhase::Failed)
                .then(|| entry.last_completed_phase.is_before_cutover()),
            error_detail: entry.error_detail.clone(),
            cancel_requested: entry.cancel_requested,
            updated_at_unix: unix_seconds(entry.updated_at),
            alias_binding: None,
            elapsed_ms: elapsed_ms(started_at),
        }
    }

    fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Migration {} ({} -> {}, alias {}): {} at {}",
            self.migration_id,
            self.source_index,
            self.target_index,
            self.alias,
            self.status,
            self.phase
        )];
        lines.push(format!(
            "Copied {} document(s), {} rejected.",
            self.documents_copied, self.documents_failed
        ));
        if self.phase == MigrationPhase::Failed {
            lines.push(format!(
                "Last completed phase: {}. Error: {}",
                self.last_completed_phase,
                self.error_detail.as_deref().unwrap_or("unknown")
            ));
        }
        if self.source_untouched == Some(true) {
            lines.push(format!("Source index {} and alias are untouched.", self.source_index));
        }
        if self.cancel_requested {
            lines.push("Cancellation requested.".to_owned());
        }
        if let Some(bound) = &self.alias_binding {
            lines.push(format!("Alias {} -> [{}]", self.alias, bound.join(", ")));
        }
        lines
    }
}

#[derive(Serialize)]
struct MigrationErrorReport {
    schema_version: u32,
    status: &'static str,
    command: &'static str,
    error_type: &'static str,
    retryable: bool,
    retry_attempts_used: Option<u32>,
    error: String,
    elapsed_ms: u64,
}

fn elapsed_ms(started_at: Instant) -> u64 {
    started_at.elapsed().as_millis() as u64
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Transient errors (an unreachable cluster, a lost ledger race) are worth
/// running the same command again.
fn classify_error(error: &eyre::Report) -> (&'static str, bool, Option<u32>) {
    if let Some(failure) = error.downcast_ref::<RetryFailure>() {
        let kind = failure.kind();
        return (kind.as_str(), kind.retryable(), Some(failure.attempts_used));
    }
    if let Some(gateway) = error.downcast_ref::<GatewayError>() {
        let kind = gateway.kind();
        return (kind.as_str(), kind.retryable(), None);
    }
    if stopped_on_ledger(error) {
        return ("transient", true, None);
    }
    if error
        .downcast_ref::<LedgerError>()
        .is_some_and(LedgerError::is_conflict)
    {
        return ("transient", true, None);
    }
    ("fatal", false, None)
}

/// A run cut short by the ledger left its entry at the last confirmed write.
fn stopped_on_ledger(error: &eyre::Report) -> bool {
    matches!(
        error.downcast_ref::<OrchestratorError>(),
        Some(OrchestratorError::Ledger(_))
    )
}

/// Exit code for a command that returned an error instead of an outcome.
pub fn error_exit_code(error: &eyre::Report) -> i32 {
    if stopped_on_ledger(error) {
        return ExitStatus::FailedRetryable.code();
    }
    USAGE_ERROR_EXIT_CODE
}

pub fn emit_error_report(
    json: bool,
    command: &'static str,
    started_at: Instant,
    error: &eyre::Report,
    report_file: Option<&Path>,
) {
    if json {
        let (error_type, retryable, retry_attempts_used) = classify_error(error);
        let report = MigrationErrorReport {
            schema_version: REPORT_SCHEMA_VERSION,
            status: "error",
            command,
            error_type,
            retryable,
            retry_attempts_used,
            error: format!("{error:#}"),
            elapsed_ms: elapsed_ms(started_at),
        };

        match serde_json::to_string(&report) {
            Ok(encoded) => {
                println!("{encoded}");
                if let Err(write_error) = append_report_line(report_file, &encoded) {
                    eprintln!("{command} failed: {error:#}\nCannot write report file: {write_error:#}");
                }
            }
            Err(ser_error) => {
                eprintln!("{command} failed: {error:#}\nReport encoding failed: {ser_error}")
            }
        }
        return;
    }

    let line = format!(
        "{command} failed after {}ms: {error:#}",
        elapsed_ms(started_at)
    );
    eprintln!("{line}");
    if let Err(write_error) = append_report_line(report_file, &line) {
        eprintln!("Cannot write report file: {write_error:#}");
    }
}

fn append_report_line(report_file: Option<&Path>, line: &str) -> Result<()> {
    let Some(path) = report_file else {
        return Ok(());
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Cannot create report directory {parent:?}"))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("Cannot open report file {path:?}"))?;
    writeln!(file, "{line}").wrap_err_with(|| format!("Cannot write report file {path:?}"))?;
    Ok(())
}

pub fn emit_report(report: &MigrationReport, json: bool, report_file: Option<&Path>) -> Result<()> {
    if json {
        let encoded =
            serde_json::to_string(report).wrap_err("Cannot serialize migration report")?;
        println!("{encoded}");
        append_report_line(report_file, &encoded)?;
        return Ok(());
    }

    for line in report.summary() {
        println!("{line}");
        append_report_line(report_file, &line)?;
    }
    Ok(())
}
