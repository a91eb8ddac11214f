use std::{
    fmt::Debug,
    path::Path,
    sync::{Mutex, MutexGuard},
    time::{Duration, UNIX_EPOCH},
};

use reindexer_core::LedgerEntry;
use rusqlite::{Connection, OptionalExtension, params};

use crate::{api::LedgerEngine, error::LedgerError};

/// ### SQLiteStore
/// One row per migration. The full entry is kept as JSON next to the
/// columns needed for compare-and-set and listing; `version` is the
/// compare-and-set token.
pub struct SQLiteStore {
    connection: Mutex<Connection>,
}

impl Debug for SQLiteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SQLiteStore")
    }
}

const DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS migrations (
        migration_id TEXT PRIMARY KEY,
        version INTEGER NOT NULL,
        phase TEXT NOT NULL,
        entry_json TEXT NOT NULL,
        updated_at_unix INTEGER NOT NULL
    );
";

impl SQLiteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let connection = Connection::open(path)?;
        connection.busy_timeout(Duration::from_millis(5000))?;
        // WAL lets `status` read while a run is writing
        let _mode: String =
            connection.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        connection.execute_batch(DB_SCHEMA)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.connection
            .lock()
            .map_err(|_| LedgerError::Custom("Failed to lock the ledger database".to_string()))
    }
}

fn stored_version(connection: &Connection, migration_id: &str) -> Result<Option<u64>, LedgerError> {
    let version: Option<i64> = connection
        .query_row(
            "SELECT version FROM migrations WHERE migration_id = ?1",
            params![migration_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.map(|version| version as u64))
}

#[async_trait::async_trait]
impl LedgerEngine for SQLiteStore {
    async fn get(&self, migration_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let connection = self.connection()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT entry_json FROM migrations WHERE migration_id = ?1",
                params![migration_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|json| serde_json::from_str(&json).map_err(LedgerError::from))
            .transpose()
    }

    async fn compare_and_set(
        &self,
        expected_version: Option<u64>,
        mut entry: LedgerEntry,
    ) -> Result<LedgerEntry, LedgerError> {
        let next_version = expected_version.map_or(1, |version| version + 1);
        entry.version = next_version;
        let entry_json = serde_json::to_string(&entry)?;
        let updated_at = entry.updated_at.duration_since(UNIX_EPOCH)?.as_secs() as i64;

        let connection = self.connection()?;
        let changed = match expected_version {
            None => connection.execute(
                "
                INSERT INTO migrations (migration_id, version, phase, entry_json, updated_at_unix)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(migration_id) DO NOTHING
                ",
                params![
                    entry.migration_id,
                    next_version as i64,
                    entry.phase.as_str(),
                    entry_json,
                    updated_at,
                ],
            )?,
            Some(expected) => connection.execute(
                "
                UPDATE migrations
                SET version = ?1, phase = ?2, entry_json = ?3, updated_at_unix = ?4
                WHERE migration_id = ?5 AND version = ?6
                ",
                params![
                    next_version as i64,
                    entry.phase.as_str(),
                    entry_json,
                    updated_at,
                    entry.migration_id,
                    expected as i64,
                ],
            )?,
        };

        if changed != 1 {
            return Err(LedgerError::Conflict {
                found: stored_version(&connection, &entry.migration_id)?,
                migration_id: entry.migration_id,
                expected: expected_version,
            });
        }
        Ok(entry)
    }

    async fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "
            SELECT entry_json
            FROM migrations
            ORDER BY updated_at_unix DESC, migration_id ASC
            ",
        )?;

        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row?)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use reindexer_core::{LedgerEntry, MigrationPhase, MigrationPlan};
    use tempfile::NamedTempFile;

    use super::SQLiteStore;
    use crate::{api::LedgerEngine, error::LedgerError};

    fn entry(id: &str) -> LedgerEntry {
        let plan = MigrationPlan::builder("orders_v1", "orders_v2", "orders")
            .migration_id(id)
            .build()
            .expect("valid plan");
        LedgerEntry::planned(&plan, UNIX_EPOCH)
    }

    #[tokio::test]
    async fn insert_then_update_bumps_version() {
        let file = NamedTempFile::new().expect("temp file");
        let store = SQLiteStore::open(file.path()).expect("open ledger");

        let created = store
            .compare_and_set(None, entry("m-1"))
            .await
            .expect("insert");
        assert_eq!(created.version, 1);

        let updated = store
            .compare_and_set(
                Some(1),
                created.advanced(MigrationPhase::TargetCreated, UNIX_EPOCH),
            )
            .await
            .expect("update");
        assert_eq!(updated.version, 2);

        let stored = store.get("m-1").await.expect("get").expect("entry exists");
        assert_eq!(stored.phase, MigrationPhase::TargetCreated);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let file = NamedTempFile::new().expect("temp file");
        let store = SQLiteStore::open(file.path()).expect("open ledger");
        let created = store
            .compare_and_set(None, entry("m-1"))
            .await
            .expect("insert");
        store
            .compare_and_set(Some(1), created.clone())
            .await
            .expect("first writer wins");

        let error = store
            .compare_and_set(Some(1), created)
            .await
            .expect_err("second writer loses");
        assert!(matches!(
            error,
            LedgerError::Conflict {
                expected: Some(1),
                found: Some(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let file = NamedTempFile::new().expect("temp file");
        let store = SQLiteStore::open(file.path()).expect("open ledger");
        store
            .compare_and_set(None, entry("m-1"))
            .await
            .expect("insert");

        let error = store
            .compare_and_set(None, entry("m-1"))
            .await
            .expect_err("entry already exists");
        assert!(error.is_conflict());
    }

    #[tokio::test]
    async fn entries_survive_reopening_the_file() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let store = SQLiteStore::open(file.path()).expect("open ledger");
            store
                .compare_and_set(None, entry("m-1"))
                .await
                .expect("insert");
        }

        let reopened = SQLiteStore::open(file.path()).expect("reopen ledger");
        let entries = reopened.list().await.expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].migration_id, "m-1");
    }
}
