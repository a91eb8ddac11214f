// Storage API for the migration ledger

use std::fmt::Debug;

use reindexer_core::LedgerEntry;

use crate::error::LedgerError;

// We need async_trait because the stabilized feature lacks support for object safety
// (i.e. dyn LedgerEngine)
#[async_trait::async_trait]
pub trait LedgerEngine: Debug + Send + Sync {
    /// Returns the entry stored for `migration_id`, if any.
    async fn get(&self, migration_id: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Stores `entry` only if the stored version equals `expected_version`
    /// (`None` meaning no entry may exist yet).
    ///
    /// On success the stored copy carries the next version and is returned.
    /// A mismatch is a [`LedgerError::Conflict`] and leaves the store untouched.
    async fn compare_and_set(
        &self,
        expected_version: Option<u64>,
        entry: LedgerEntry,
    ) -> Result<LedgerEntry, LedgerError>;

    /// All entries, most recently updated first.
    async fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError>;
}
