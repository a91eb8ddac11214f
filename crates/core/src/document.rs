use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque cursor into a source index.
///
/// It is whatever the cluster hands back as the ordering key of a document
/// (for Elasticsearch, the `sort` values used with `search_after`). Reading
/// "after" a checkpoint must be strictly exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(pub Value);

impl Checkpoint {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single document as moved between indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier; writing the same id twice overwrites.
    pub id: String,
    pub source: Value,
    pub sort_key: Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of one chunk handed to the copy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub documents_attempted: u64,
    pub documents_succeeded: u64,
    pub documents_failed: Vec<DocumentFailure>,
    /// Ordering key of the last written document, or the incoming checkpoint
    /// when nothing was read.
    pub next_checkpoint: Option<Checkpoint>,
    /// No documents remain after `next_checkpoint`.
    pub exhausted: bool,
}

impl BatchResult {
    pub fn empty(checkpoint: Option<Checkpoint>) -> Self {
        Self {
            documents_attempted: 0,
            documents_succeeded: 0,
            documents_failed: Vec::new(),
            next_checkpoint: checkpoint,
            exhausted: true,
        }
    }

    pub fn failed_count(&self) -> u64 {
        self.documents_failed.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasOp {
    Add,
    Remove,
}

/// One entry of an atomic alias update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasAction {
    pub op: AliasOp,
    pub index: String,
    pub alias: String,
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            op: AliasOp::Add,
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            op: AliasOp::Remove,
            index: index.into(),
            alias: alias.into(),
        }
    }
}

impl fmt::Display for AliasAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            AliasOp::Add => write!(f, "add {} -> {}", self.alias, self.index),
            AliasOp::Remove => write!(f, "remove {} -> {}", self.alias, self.index),
        }
    }
}
