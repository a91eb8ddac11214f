use std::{path::Path, sync::Arc, time::SystemTime};

use reindexer_core::LedgerEntry;
use tracing::{debug, info};

use crate::api::LedgerEngine;
use crate::error::LedgerError;
use crate::store_db::in_memory::Store as InMemoryStore;
#[cfg(feature = "sqlite")]
use crate::store_db::sqlite::SQLiteStore;

/// Attempts at flipping `cancel_requested` before giving up on a busy entry.
const CANCEL_CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct Ledger {
    engine: Arc<dyn LedgerEngine>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            engine: Arc::new(InMemoryStore::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    InMemory,
    #[cfg(feature = "sqlite")]
    SQLite,
}

impl Ledger {
    pub fn new(_path: &Path, engine_type: EngineType) -> Result<Self, LedgerError> {
        info!("Opening migration ledger ({engine_type:?})");
        let ledger = match engine_type {
            EngineType::InMemory => Self::default(),
            #[cfg(feature = "sqlite")]
            EngineType::SQLite => Self {
                engine: Arc::new(SQLiteStore::open(_path)?),
            },
        };
        Ok(ledger)
    }

    pub fn with_engine(engine: Arc<dyn LedgerEngine>) -> Self {
        Self { engine }
    }

    pub async fn get(&self, migration_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        self.engine.get(migration_id).await
    }

    /// Stores a brand new entry; fails with a conflict if one already exists.
    pub async fn create(&self, entry: LedgerEntry) -> Result<LedgerEntry, LedgerError> {
        debug!(migration_id = %entry.migration_id, phase = %entry.phase, "creating ledger entry");
        self.engine.compare_and_set(None, entry).await
    }

    /// Replaces `current` with `next`, provided nobody wrote in between.
    pub async fn update(
        &self,
        current: &LedgerEntry,
        next: LedgerEntry,
    ) -> Result<LedgerEntry, LedgerError> {
        debug!(
            migration_id = %next.migration_id,
            version = current.version,
            phase = %next.phase,
            "updating ledger entry"
        );
        self.engine
            .compare_and_set(Some(current.version), next)
            .await
    }

    pub async fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.engine.list().await
    }

    /// Flags a migration for cancellation. The running orchestrator honours
    /// the flag at its next phase or batch boundary.
    pub async fn request_cancel(&self, migration_id: &str) -> Result<LedgerEntry, LedgerError> {
        let mut last_error = None;
        for _ in 0..CANCEL_CAS_ATTEMPTS {
            let current = self
                .get(migration_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(migration_id.to_owned()))?;
            if current.cancel_requested || current.phase.is_terminal() {
                return Ok(current);
            }

            let mut next = current.clone();
            next.cancel_requested = true;
            next.updated_at = SystemTime::now();
            match self.update(&current, next).await {
                Ok(stored) => {
                    info!(migration_id, "cancellation requested");
                    return Ok(stored);
                }
                Err(error) if error.is_conflict() => last_error = Some(error),
                Err(error) => return Err(error),
            }
        }
        Err(last_error
            .unwrap_or_else(|| LedgerError::Custom("cancellation was not recorded".to_owned())))
    }
}
