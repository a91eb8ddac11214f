use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "concurrent writer detected for migration `{migration_id}` (expected version {expected:?}, found {found:?})"
    )]
    Conflict {
        migration_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("no ledger entry for migration `{0}`")]
    NotFound(String),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("time conversion error: {0}")]
    Time(#[from] std::time::SystemTimeError),
    #[error("{0}")]
    Custom(String),
}

impl LedgerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
