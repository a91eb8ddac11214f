use std::{sync::Arc, time::SystemTime};

use reindexer_core::{AliasAction, CANCELLED_DETAIL, LedgerEntry, MigrationPhase, MigrationPlan};
use reindexer_gateway::{
    ClusterGateway, CreateIndexOutcome, DeleteIndexOutcome, RetryFailure, RetryPolicy,
    retry_async,
};
use reindexer_ledger::{Ledger, LedgerError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    copier::BulkCopyEngine,
    error::{MigrationFailure, OrchestratorError},
};

/// How a call to [`Orchestrator::run`] ended. Each variant carries the
/// entry as it is stored in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    Complete(LedgerEntry),
    Failed { entry: LedgerEntry, retryable: bool },
    Cancelled(LedgerEntry),
}

impl MigrationOutcome {
    /// Classifies a stored entry. Entries still in flight have no outcome.
    pub fn from_entry(entry: LedgerEntry) -> Option<Self> {
        if entry.phase.is_terminal() {
            Some(Self::terminal(entry))
        } else {
            None
        }
    }

    fn terminal(entry: LedgerEntry) -> Self {
        if entry.phase == MigrationPhase::Complete {
            Self::Complete(entry)
        } else if entry.is_cancelled() {
            Self::Cancelled(entry)
        } else {
            Self::Failed {
                retryable: entry.retryable,
                entry,
            }
        }
    }

    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Complete(entry) | Self::Cancelled(entry) => entry,
            Self::Failed { entry, .. } => entry,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Why a phase stopped short of its transition.
enum Interrupt {
    Failure(MigrationFailure),
    Cancelled,
    Fatal(OrchestratorError),
}

impl From<LedgerError> for Interrupt {
    fn from(error: LedgerError) -> Self {
        if error.is_conflict() {
            Self::Failure(MigrationFailure::LedgerConflict(error))
        } else {
            Self::Fatal(error.into())
        }
    }
}

impl From<RetryFailure> for Interrupt {
    fn from(failure: RetryFailure) -> Self {
        Self::Failure(failure.into())
    }
}

impl From<OrchestratorError> for Interrupt {
    fn from(error: OrchestratorError) -> Self {
        Self::Fatal(error)
    }
}

/// Drives one migration through its phases, persisting every step.
///
/// Running the same plan again is always safe: the ledger entry decides
/// where work resumes, and every cluster operation tolerates being repeated.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    gateway: Arc<dyn ClusterGateway>,
    ledger: Ledger,
    cancellation: CancellationToken,
    retry_failed: bool,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn ClusterGateway>, ledger: Ledger) -> Self {
        Self {
            gateway,
            ledger,
            cancellation: CancellationToken::new(),
            retry_failed: false,
        }
    }

    /// Stops the run at the next phase or batch boundary once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Resume `Failed` migrations from their last completed phase instead of
    /// reporting the stored failure.
    pub fn retry_failed(mut self, retry_failed: bool) -> Self {
        self.retry_failed = retry_failed;
        self
    }

    pub async fn run(&self, plan: &MigrationPlan) -> Result<MigrationOutcome, OrchestratorError> {
        let mut entry = self.load_or_create(plan).await?;

        match entry.phase {
            MigrationPhase::Complete => {
                info!(migration_id = %entry.migration_id, "migration already complete");
                return Ok(MigrationOutcome::Complete(entry));
            }
            MigrationPhase::Failed if !self.retry_failed => {
                info!(
                    migration_id = %entry.migration_id,
                    error_detail = entry.error_detail.as_deref().unwrap_or_default(),
                    "migration previously failed, not retrying"
                );
                return Ok(MigrationOutcome::terminal(entry));
            }
            MigrationPhase::Failed => {
                let rewound = entry.rewound(SystemTime::now());
                info!(
                    migration_id = %entry.migration_id,
                    resume_from = %rewound.phase,
                    "retrying failed migration"
                );
                entry = self.ledger.update(&entry, rewound).await?;
            }
            phase => {
                info!(migration_id = %entry.migration_id, %phase, "resuming migration");
            }
        }

        let policy = RetryPolicy::new(plan.max_retries(), plan.retry_base_delay());
        let copier = BulkCopyEngine::new(self.gateway.clone(), policy);

        while !entry.phase.is_terminal() {
            match self.advance(plan, policy, &copier, &mut entry).await {
                Ok(()) => {}
                Err(Interrupt::Failure(failure)) => {
                    let retryable = failure.retryable();
                    error!(
                        migration_id = %entry.migration_id,
                        phase = %entry.phase,
                        retryable,
                        error = %failure,
                        "migration failed"
                    );
                    let failed = self
                        .record_failure(entry, failure.to_string(), retryable)
                        .await?;
                    return Ok(MigrationOutcome::terminal(failed));
                }
                Err(Interrupt::Cancelled) => {
                    warn!(
                        migration_id = %entry.migration_id,
                        phase = %entry.phase,
                        source_untouched = entry.phase.is_before_cutover(),
                        "migration cancelled"
                    );
                    let cancelled = self
                        .record_failure(entry, CANCELLED_DETAIL.to_owned(), true)
                        .await?;
                    return Ok(MigrationOutcome::terminal(cancelled));
                }
                Err(Interrupt::Fatal(error)) => return Err(error),
            }
        }

        info!(
            migration_id = %entry.migration_id,
            phase = %entry.phase,
            documents_copied = entry.documents_copied_count,
            documents_failed = entry.documents_failed_count,
            "migration finished"
        );
        Ok(MigrationOutcome::terminal(entry))
    }

    async fn load_or_create(&self, plan: &MigrationPlan) -> Result<LedgerEntry, OrchestratorError> {
        let entry = match self.ledger.get(plan.migration_id()).await? {
            Some(entry) => entry,
            None => {
                let planned = LedgerEntry::planned(plan, SystemTime::now());
                match self.ledger.create(planned).await {
                    Ok(entry) => {
                        info!(
                            migration_id = plan.migration_id(),
                            source = plan.source_index(),
                            target = plan.target_index(),
                            alias = plan.alias(),
                            "migration planned"
                        );
                        entry
                    }
                    // someone created it first; carry on with theirs
                    Err(error) if error.is_conflict() => self
                        .ledger
                        .get(plan.migration_id())
                        .await?
                        .ok_or_else(|| LedgerError::NotFound(plan.migration_id().to_owned()))?,
                    Err(error) => return Err(error.into()),
                }
            }
        };

        if entry.plan_digest != plan.digest() {
            return Err(OrchestratorError::PlanMismatch {
                migration_id: entry.migration_id,
            });
        }
        Ok(entry)
    }

    /// Performs the work of the current phase and records the next one.
    async fn advance(
        &self,
        plan: &MigrationPlan,
        policy: RetryPolicy,
        copier: &BulkCopyEngine,
        entry: &mut LedgerEntry,
    ) -> Result<(), Interrupt> {
        self.boundary(entry).await?;

        match entry.phase {
            MigrationPhase::Planned => {
                let (outcome, _) = retry_async(policy, "create index", || {
                    self.gateway
                        .create_index(plan.target_index(), plan.mapping())
                })
                .await?;
                match outcome {
                    CreateIndexOutcome::Created => {
                        info!(index = plan.target_index(), "target index created")
                    }
                    CreateIndexOutcome::AlreadyExists => info!(
                        index = plan.target_index(),
                        "target index already exists with the requested mapping"
                    ),
                }
                self.transition(entry, MigrationPhase::TargetCreated).await
            }
            MigrationPhase::TargetCreated => {
                self.transition(entry, MigrationPhase::Copying).await
            }
            MigrationPhase::Copying => self.copy(plan, copier, entry).await,
            MigrationPhase::CopyComplete => {
                let mut actions = vec![AliasAction::add(plan.target_index(), plan.alias())];
                if plan.remove_source_alias() {
                    actions.push(AliasAction::remove(plan.source_index(), plan.alias()));
                }
                retry_async(policy, "update aliases", || {
                    self.gateway.update_aliases(&actions)
                })
                .await?;
                info!(
                    alias = plan.alias(),
                    target = plan.target_index(),
                    actions = actions.len(),
                    "alias moved to the target index"
                );
                self.transition(entry, MigrationPhase::AliasUpdated).await
            }
            MigrationPhase::AliasUpdated if plan.keep_source() => {
                info!(index = plan.source_index(), "keeping source index");
                self.transition(entry, MigrationPhase::Complete).await
            }
            MigrationPhase::AliasUpdated => {
                let (outcome, _) = retry_async(policy, "delete index", || {
                    self.gateway.delete_index(plan.source_index())
                })
                .await?;
                match outcome {
                    DeleteIndexOutcome::Deleted => {
                        info!(index = plan.source_index(), "source index deleted")
                    }
                    DeleteIndexOutcome::NotFound => {
                        info!(index = plan.source_index(), "source index already gone")
                    }
                }
                self.transition(entry, MigrationPhase::SourceDeleted).await
            }
            MigrationPhase::SourceDeleted => {
                self.transition(entry, MigrationPhase::Complete).await
            }
            MigrationPhase::Complete | MigrationPhase::Failed => Ok(()),
        }
    }

    /// Copies chunk after chunk, persisting the checkpoint after each one,
    /// until the source is exhausted.
    async fn copy(
        &self,
        plan: &MigrationPlan,
        copier: &BulkCopyEngine,
        entry: &mut LedgerEntry,
    ) -> Result<(), Interrupt> {
        loop {
            let batch = copier
                .copy_batch(
                    plan.source_index(),
                    plan.target_index(),
                    entry.last_copied_checkpoint.as_ref(),
                    plan.batch_size(),
                )
                .await?;

            let now = SystemTime::now();
            let mut next = entry.with_batch(&batch, now);
            let over_tolerance = next.documents_failed_count > plan.failure_tolerance();
            if batch.exhausted && !over_tolerance {
                next = next.advanced(MigrationPhase::CopyComplete, now);
            }
            self.persist(entry, next).await?;
            debug!(
                migration_id = %entry.migration_id,
                copied = entry.documents_copied_count,
                failed = entry.documents_failed_count,
                checkpoint = ?entry.last_copied_checkpoint,
                "batch checkpointed"
            );

            if over_tolerance {
                return Err(Interrupt::Failure(MigrationFailure::PartialBatch {
                    failed: entry.documents_failed_count,
                    tolerance: plan.failure_tolerance(),
                }));
            }
            if batch.exhausted {
                info!(
                    migration_id = %entry.migration_id,
                    from = %MigrationPhase::Copying,
                    to = %MigrationPhase::CopyComplete,
                    "phase transition"
                );
                return Ok(());
            }
            self.boundary(entry).await?;
        }
    }

    /// Picks up changes other processes made to the entry and honours
    /// cancellation requests.
    ///
    /// The only foreign write tolerated is an operator flipping
    /// `cancel_requested`; anything else means a second orchestrator is
    /// running and this one must stop.
    async fn boundary(&self, entry: &mut LedgerEntry) -> Result<(), Interrupt> {
        let latest = self
            .ledger
            .get(&entry.migration_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(entry.migration_id.clone()))?;

        if latest.version != entry.version {
            let mut ours = entry.clone();
            ours.version = latest.version;
            ours.cancel_requested = latest.cancel_requested;
            ours.updated_at = latest.updated_at;
            if ours != latest {
                return Err(Interrupt::Failure(MigrationFailure::LedgerConflict(
                    LedgerError::Conflict {
                        migration_id: entry.migration_id.clone(),
                        expected: Some(entry.version),
                        found: Some(latest.version),
                    },
                )));
            }
            *entry = latest;
        }

        if entry.cancel_requested || self.cancellation.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    async fn transition(
        &self,
        entry: &mut LedgerEntry,
        next: MigrationPhase,
    ) -> Result<(), Interrupt> {
        let from = entry.phase;
        if !from.can_transition_to(next) {
            return Err(OrchestratorError::IllegalTransition {
                migration_id: entry.migration_id.clone(),
                from,
                to: next,
            }
            .into());
        }
        let advanced = entry.advanced(next, SystemTime::now());
        self.persist(entry, advanced).await?;
        info!(migration_id = %entry.migration_id, %from, to = %next, "phase transition");
        Ok(())
    }

    /// Stores `next` over `entry`. A lost compare-and-set is checked the same
    /// way as at a boundary, so a racing cancellation still cancels.
    async fn persist(&self, entry: &mut LedgerEntry, next: LedgerEntry) -> Result<(), Interrupt> {
        match self.ledger.update(entry, next).await {
            Ok(stored) => {
                *entry = stored;
                Ok(())
            }
            Err(error) if error.is_conflict() => {
                self.boundary(entry).await?;
                Err(Interrupt::Failure(MigrationFailure::LedgerConflict(error)))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Moves the entry to `Failed`. A lost compare-and-set is retried once
    /// against the latest stored entry.
    async fn record_failure(
        &self,
        entry: LedgerEntry,
        detail: String,
        retryable: bool,
    ) -> Result<LedgerEntry, OrchestratorError> {
        let failed = entry.failed(detail.clone(), retryable, SystemTime::now());
        match self.ledger.update(&entry, failed).await {
            Ok(stored) => Ok(stored),
            Err(error) if error.is_conflict() => {
                let latest = self
                    .ledger
                    .get(&entry.migration_id)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(entry.migration_id.clone()))?;
                if latest.phase.is_terminal() {
                    return Ok(latest);
                }
                let failed = latest.failed(detail, retryable, SystemTime::now());
                Ok(self.ledger.update(&latest, failed).await?)
            }
            Err(error) => Err(error.into()),
        }
    }
}
