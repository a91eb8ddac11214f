use std::fmt::Debug;

use reindexer_core::{AliasAction, Checkpoint, Document, DocumentFailure};
use serde_json::Value;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateIndexOutcome {
    Created,
    /// The index was already there with a compatible mapping.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteIndexOutcome {
    Deleted,
    NotFound,
}

// We need async_trait because the stabilized feature lacks support for object safety
// (i.e. dyn ClusterGateway)
#[async_trait::async_trait]
pub trait ClusterGateway: Debug + Send + Sync {
    /// Creates `name` with `mapping`.
    ///
    /// An existing index with a matching mapping is reported as
    /// [`CreateIndexOutcome::AlreadyExists`]; a different mapping is a
    /// [`GatewayError::MappingConflict`].
    async fn create_index(
        &self,
        name: &str,
        mapping: &Value,
    ) -> Result<CreateIndexOutcome, GatewayError>;

    /// Applies every action in one request. The cluster applies all of them or none.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), GatewayError>;

    async fn delete_index(&self, name: &str) -> Result<DeleteIndexOutcome, GatewayError>;

    /// Reads up to `limit` documents ordered by their sort key, strictly after `after`.
    async fn read_page(
        &self,
        index: &str,
        after: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<Document>, GatewayError>;

    /// Writes `documents` keyed by id, overwriting existing ones.
    ///
    /// Returns the documents the cluster rejected; an empty vector means every
    /// write was confirmed.
    async fn write_page(
        &self,
        index: &str,
        documents: &[Document],
    ) -> Result<Vec<DocumentFailure>, GatewayError>;

    /// Indices currently bound to `alias`, sorted by name.
    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>, GatewayError>;
}
