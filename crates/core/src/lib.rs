//! Shared data model for index migrations.
//!
//! Everything the orchestrator, the ledger and the cluster gateway exchange
//! lives here: the immutable [`MigrationPlan`], the ordered
//! [`MigrationPhase`] state machine, the persisted [`LedgerEntry`] and the
//! per-batch transfer types.

pub mod document;
pub mod entry;
pub mod phase;
pub mod plan;

pub use document::{AliasAction, AliasOp, BatchResult, Checkpoint, Document, DocumentFailure};
pub use entry::{CANCELLED_DETAIL, LedgerEntry, MAX_RECORDED_FAILURES};
pub use phase::MigrationPhase;
pub use plan::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY, MAX_BATCH_SIZE,
    MigrationPlan, MigrationPlanBuilder, PlanError,
};
