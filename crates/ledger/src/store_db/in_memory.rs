use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard},
};

use reindexer_core::LedgerEntry;

use crate::{api::LedgerEngine, error::LedgerError};

#[derive(Default, Clone)]
pub struct Store(Arc<Mutex<StoreInner>>);

#[derive(Default, Debug)]
struct StoreInner {
    /// Map of migration id to its single ledger entry
    entries: HashMap<String, LedgerEntry>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, StoreInner>, LedgerError> {
        self.0
            .lock()
            .map_err(|_| LedgerError::Custom("Failed to lock the ledger".to_string()))
    }
}

#[async_trait::async_trait]
impl LedgerEngine for Store {
    async fn get(&self, migration_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.inner()?.entries.get(migration_id).cloned())
    }

    async fn compare_and_set(
        &self,
        expected_version: Option<u64>,
        mut entry: LedgerEntry,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut inner = self.inner()?;
        let found = inner
            .entries
            .get(&entry.migration_id)
            .map(|stored| stored.version);
        if found != expected_version {
            return Err(LedgerError::Conflict {
                migration_id: entry.migration_id,
                expected: expected_version,
                found,
            });
        }

        entry.version = expected_version.map_or(1, |version| version + 1);
        inner
            .entries
            .insert(entry.migration_id.clone(), entry.clone());
        Ok(entry)
    }

    async fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut entries: Vec<LedgerEntry> = self.inner()?.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InMemoryLedger")
    }
}
