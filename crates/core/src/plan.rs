use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Every read asks for one document more than the batch, and a search may
/// return at most 10000 hits (`index.max_result_window`).
pub const MAX_BATCH_SIZE: usize = 9_999;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1_000);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("source and target index are both `{0}`")]
    SameIndex(String),
    #[error("alias `{0}` collides with an index name")]
    AliasCollision(String),
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    #[error("batch size {0} exceeds the maximum of {MAX_BATCH_SIZE}")]
    BatchSizeTooLarge(usize),
}

/// Immutable description of one migration.
///
/// Built through [`MigrationPlan::builder`], which validates names and
/// fills the safety options with their defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationPlan {
    migration_id: String,
    source_index: String,
    target_index: String,
    alias: String,
    mapping: Value,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: Duration,
    keep_source: bool,
    remove_source_alias: bool,
    failure_tolerance: u64,
}

impl MigrationPlan {
    pub fn builder(
        source_index: impl Into<String>,
        target_index: impl Into<String>,
        alias: impl Into<String>,
    ) -> MigrationPlanBuilder {
        MigrationPlanBuilder {
            migration_id: None,
            source_index: source_index.into(),
            target_index: target_index.into(),
            alias: alias.into(),
            mapping: json!({}),
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            keep_source: false,
            remove_source_alias: true,
            failure_tolerance: 0,
        }
    }

    /// `"{source}-to-{target}-{unix_seconds}"`
    pub fn derive_id(source_index: &str, target_index: &str, at: SystemTime) -> String {
        let seconds = at
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        format!("{source_index}-to-{target_index}-{seconds}")
    }

    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    pub fn source_index(&self) -> &str {
        &self.source_index
    }

    pub fn target_index(&self) -> &str {
        &self.target_index
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn mapping(&self) -> &Value {
        &self.mapping
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    pub fn keep_source(&self) -> bool {
        self.keep_source
    }

    pub fn remove_source_alias(&self) -> bool {
        self.remove_source_alias
    }

    pub fn failure_tolerance(&self) -> u64 {
        self.failure_tolerance
    }

    /// Hex SHA-256 over the parts of the plan that define *what* is migrated.
    ///
    /// Tuning knobs (batch size, retries, tolerance) are excluded so that a
    /// resume may change them. Names, mapping and what happens to the source
    /// may not change.
    pub fn digest(&self) -> String {
        let canonical = json!({
            "source_index": self.source_index,
            "target_index": self.target_index,
            "alias": self.alias,
            "mapping": self.mapping,
            "keep_source": self.keep_source,
            "remove_source_alias": self.remove_source_alias,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone)]
pub struct MigrationPlanBuilder {
    migration_id: Option<String>,
    source_index: String,
    target_index: String,
    alias: String,
    mapping: Value,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: Duration,
    keep_source: bool,
    remove_source_alias: bool,
    failure_tolerance: u64,
}

impl MigrationPlanBuilder {
    pub fn migration_id(mut self, migration_id: impl Into<String>) -> Self {
        self.migration_id = Some(migration_id.into());
        self
    }

    pub fn mapping(mut self, mapping: Value) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_base_delay(mut self, retry_base_delay: Duration) -> Self {
        self.retry_base_delay = retry_base_delay;
        self
    }

    pub fn keep_source(mut self, keep_source: bool) -> Self {
        self.keep_source = keep_source;
        self
    }

    pub fn remove_source_alias(mut self, remove_source_alias: bool) -> Self {
        self.remove_source_alias = remove_source_alias;
        self
    }

    pub fn failure_tolerance(mut self, failure_tolerance: u64) -> Self {
        self.failure_tolerance = failure_tolerance;
        self
    }

    pub fn build(self) -> Result<MigrationPlan, PlanError> {
        if self.source_index.trim().is_empty() {
            return Err(PlanError::Empty("source index"));
        }
        if self.target_index.trim().is_empty() {
            return Err(PlanError::Empty("target index"));
        }
        if self.alias.trim().is_empty() {
            return Err(PlanError::Empty("alias"));
        }
        if self.source_index == self.target_index {
            return Err(PlanError::SameIndex(self.source_index));
        }
        if self.alias == self.source_index || self.alias == self.target_index {
            return Err(PlanError::AliasCollision(self.alias));
        }
        if self.batch_size == 0 {
            return Err(PlanError::ZeroBatchSize);
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(PlanError::BatchSizeTooLarge(self.batch_size));
        }

        let migration_id = match self.migration_id {
            Some(id) if id.trim().is_empty() => return Err(PlanError::Empty("migration id")),
            Some(id) => id,
            None => MigrationPlan::derive_id(&self.source_index, &self.target_index, SystemTime::now()),
        };

        Ok(MigrationPlan {
            migration_id,
            source_index: self.source_index,
            target_index: self.target_index,
            alias: self.alias,
            mapping: self.mapping,
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
            keep_source: self.keep_source,
            remove_source_alias: self.remove_source_alias,
            failure_tolerance: self.failure_tolerance,
        })
    }
}
