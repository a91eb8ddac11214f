use reindexer_core::MigrationPhase;
use reindexer_gateway::RetryFailure;
use reindexer_ledger::LedgerError;
use thiserror::Error;

/// Errors that stop a run without recording anything in the ledger.
///
/// The ledger entry is left as it was last written, so a later run resumes
/// from there.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error(
        "migration `{migration_id}` was started with other indices, alias, mapping or source handling"
    )]
    PlanMismatch { migration_id: String },
    #[error("illegal phase transition {from} -> {to} for migration `{migration_id}`")]
    IllegalTransition {
        migration_id: String,
        from: MigrationPhase,
        to: MigrationPhase,
    },
}

/// Reasons a migration ends up `Failed`; recorded as the entry's `error_detail`.
#[derive(Debug, Error)]
pub enum MigrationFailure {
    #[error(transparent)]
    Cluster(#[from] RetryFailure),
    #[error("{failed} documents could not be copied (tolerance {tolerance})")]
    PartialBatch { failed: u64, tolerance: u64 },
    #[error("lost a ledger update to a concurrent writer: {0}")]
    LedgerConflict(LedgerError),
}

impl MigrationFailure {
    /// Whether resuming the same plan later may succeed without operator changes.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Cluster(failure) => failure.exhausted_transient(),
            Self::PartialBatch { .. } => false,
            Self::LedgerConflict(_) => true,
        }
    }
}
