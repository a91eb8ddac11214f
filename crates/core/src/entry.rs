use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{
    document::{BatchResult, Checkpoint, DocumentFailure},
    phase::MigrationPhase,
    plan::MigrationPlan,
};

/// Upper bound on per-document failures kept in an entry for review.
/// The running total in `documents_failed_count` is never truncated.
pub const MAX_RECORDED_FAILURES: usize = 100;

pub const CANCELLED_DETAIL: &str = "cancelled";

/// Durable progress record of one migration, keyed by `migration_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub migration_id: String,
    pub phase: MigrationPhase,
    /// Last phase reached before entering `Failed`; equals `phase` otherwise.
    pub last_completed_phase: MigrationPhase,
    pub last_copied_checkpoint: Option<Checkpoint>,
    pub documents_copied_count: u64,
    pub documents_failed_count: u64,
    pub failures: Vec<DocumentFailure>,
    pub error_detail: Option<String>,
    /// Whether a `Failed` entry is worth resuming as-is (transient cause).
    #[serde(default)]
    pub retryable: bool,
    pub cancel_requested: bool,
    pub plan_digest: String,
    pub source_index: String,
    pub target_index: String,
    pub alias: String,
    /// Compare-and-set token; bumped by the ledger on every write.
    pub version: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl LedgerEntry {
    pub fn planned(plan: &MigrationPlan, now: SystemTime) -> Self {
        Self {
            migration_id: plan.migration_id().to_owned(),
            phase: MigrationPhase::Planned,
            last_completed_phase: MigrationPhase::Planned,
            last_copied_checkpoint: None,
            documents_copied_count: 0,
            documents_failed_count: 0,
            failures: Vec::new(),
            error_detail: None,
            retryable: false,
            cancel_requested: false,
            plan_digest: plan.digest(),
            source_index: plan.source_index().to_owned(),
            target_index: plan.target_index().to_owned(),
            alias: plan.alias().to_owned(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of `self` moved to `next`. Callers check
    /// [`MigrationPhase::can_transition_to`] first.
    pub fn advanced(&self, next: MigrationPhase, now: SystemTime) -> Self {
        let mut entry = self.clone();
        entry.phase = next;
        entry.last_completed_phase = next;
        entry.updated_at = now;
        entry
    }

    /// Copy of `self` moved to `Failed`, keeping the phase it failed from.
    pub fn failed(&self, detail: impl Into<String>, retryable: bool, now: SystemTime) -> Self {
        let mut entry = self.clone();
        entry.phase = MigrationPhase::Failed;
        entry.error_detail = Some(detail.into());
        entry.retryable = retryable;
        entry.updated_at = now;
        entry
    }

    /// Folds a confirmed batch into the progress counters.
    pub fn with_batch(&self, batch: &BatchResult, now: SystemTime) -> Self {
        let mut entry = self.clone();
        entry.documents_copied_count = entry
            .documents_copied_count
            .saturating_add(batch.documents_succeeded);
        entry.documents_failed_count = entry
            .documents_failed_count
            .saturating_add(batch.failed_count());
        let room = MAX_RECORDED_FAILURES.saturating_sub(entry.failures.len());
        entry
            .failures
            .extend(batch.documents_failed.iter().take(room).cloned());
        if batch.next_checkpoint.is_some() {
            entry.last_copied_checkpoint = batch.next_checkpoint.clone();
        }
        entry.updated_at = now;
        entry
    }

    /// Operator retry of a failed migration: resume from the last phase that
    /// completed, with the error cleared.
    pub fn rewound(&self, now: SystemTime) -> Self {
        let mut entry = self.clone();
        entry.phase = self.last_completed_phase;
        entry.error_detail = None;
        entry.retryable = false;
        entry.cancel_requested = false;
        entry.updated_at = now;
        entry
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase == MigrationPhase::Failed
            && self.error_detail.as_deref() == Some(CANCELLED_DETAIL)
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use serde_json::json;

    use super::*;
    use crate::document::DocumentFailure;

    fn plan() -> MigrationPlan {
        MigrationPlan::builder("orders_v1", "orders_v2", "orders")
            .migration_id("m-1")
            .build()
            .expect("valid plan")
    }

    #[test]
    fn batch_updates_counters_and_checkpoint() {
        let entry = LedgerEntry::planned(&plan(), UNIX_EPOCH);
        let batch = BatchResult {
            documents_attempted: 3,
            documents_succeeded: 2,
            documents_failed: vec![DocumentFailure {
                id: "7".to_owned(),
                reason: "mapper_parsing_exception".to_owned(),
            }],
            next_checkpoint: Some(Checkpoint::new(json!(["7"]))),
            exhausted: false,
        };

        let updated = entry.with_batch(&batch, UNIX_EPOCH);
        assert_eq!(updated.documents_copied_count, 2);
        assert_eq!(updated.documents_failed_count, 1);
        assert_eq!(updated.failures.len(), 1);
        assert_eq!(
            updated.last_copied_checkpoint,
            Some(Checkpoint::new(json!(["7"])))
        );
    }

    #[test]
    fn empty_batch_keeps_existing_checkpoint() {
        let mut entry = LedgerEntry::planned(&plan(), UNIX_EPOCH);
        entry.last_copied_checkpoint = Some(Checkpoint::new(json!(["4"])));

        let updated = entry.with_batch(&BatchResult::empty(None), UNIX_EPOCH);
        assert_eq!(
            updated.last_copied_checkpoint,
            Some(Checkpoint::new(json!(["4"])))
        );
    }

    #[test]
    fn recorded_failures_are_bounded() {
        let entry = LedgerEntry::planned(&plan(), UNIX_EPOCH);
        let failures = (0..MAX_RECORDED_FAILURES + 20)
            .map(|i| DocumentFailure {
                id: i.to_string(),
                reason: "rejected".to_owned(),
            })
            .collect::<Vec<_>>();
        let batch = BatchResult {
            documents_attempted: failures.len() as u64,
            documents_succeeded: 0,
            documents_failed: failures,
            next_checkpoint: None,
            exhausted: false,
        };

        let updated = entry.with_batch(&batch, UNIX_EPOCH);
        assert_eq!(updated.failures.len(), MAX_RECORDED_FAILURES);
        assert_eq!(
            updated.documents_failed_count,
            (MAX_RECORDED_FAILURES + 20) as u64
        );
    }

    #[test]
    fn failing_remembers_last_completed_phase_and_rewinds_to_it() {
        let entry = LedgerEntry::planned(&plan(), UNIX_EPOCH)
            .advanced(MigrationPhase::TargetCreated, UNIX_EPOCH)
            .advanced(MigrationPhase::Copying, UNIX_EPOCH);

        let failed = entry.failed("cluster timed out", true, UNIX_EPOCH);
        assert_eq!(failed.phase, MigrationPhase::Failed);
        assert_eq!(failed.last_completed_phase, MigrationPhase::Copying);
        assert_eq!(failed.error_detail.as_deref(), Some("cluster timed out"));
        assert!(failed.retryable);

        let rewound = failed.rewound(UNIX_EPOCH);
        assert_eq!(rewound.phase, MigrationPhase::Copying);
        assert!(rewound.error_detail.is_none());
        assert!(!rewound.retryable);
    }

    #[test]
    fn cancellation_is_recognised_from_error_detail() {
        let entry = LedgerEntry::planned(&plan(), UNIX_EPOCH);
        assert!(entry.failed(CANCELLED_DETAIL, true, UNIX_EPOCH).is_cancelled());
        assert!(!entry.failed("mapping conflict", false, UNIX_EPOCH).is_cancelled());
    }
}
