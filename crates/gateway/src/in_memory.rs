use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard},
};

use reindexer_core::{AliasAction, AliasOp, Checkpoint, Document, DocumentFailure};
use serde_json::{Value, json};

use crate::{
    api::{ClusterGateway, CreateIndexOutcome, DeleteIndexOutcome},
    error::GatewayError,
    mapping::mapping_matches,
};

/// In-process cluster with the same contract as a real one: documents are
/// ordered by id, alias updates are all-or-nothing, deleting an index drops
/// its alias bindings.
#[derive(Default, Clone)]
pub struct InMemoryCluster(Arc<Mutex<ClusterInner>>);

#[derive(Default, Debug)]
struct ClusterInner {
    indices: BTreeMap<String, IndexState>,
    /// Map of alias name to the indices bound to it
    aliases: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Default, Debug)]
struct IndexState {
    mapping: Value,
    documents: BTreeMap<String, Value>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, ClusterInner>, GatewayError> {
        self.0
            .lock()
            .map_err(|_| GatewayError::Custom("Failed to lock the cluster".to_string()))
    }

    /// Creates (or replaces) `name` holding `documents`, bypassing the gateway contract.
    pub fn seed_index(
        &self,
        name: &str,
        mapping: Value,
        documents: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), GatewayError> {
        let state = IndexState {
            mapping,
            documents: documents.into_iter().collect(),
        };
        self.inner()?.indices.insert(name.to_owned(), state);
        Ok(())
    }

    pub fn bind_alias(&self, alias: &str, index: &str) -> Result<(), GatewayError> {
        self.update_bindings(&[AliasAction::add(index, alias)])
    }

    pub fn index_exists(&self, name: &str) -> Result<bool, GatewayError> {
        Ok(self.inner()?.indices.contains_key(name))
    }

    pub fn document_ids(&self, index: &str) -> Result<Vec<String>, GatewayError> {
        let inner = self.inner()?;
        let state = inner
            .indices
            .get(index)
            .ok_or_else(|| GatewayError::IndexNotFound(index.to_owned()))?;
        Ok(state.documents.keys().cloned().collect())
    }

    pub fn document(&self, index: &str, id: &str) -> Result<Option<Value>, GatewayError> {
        let inner = self.inner()?;
        let state = inner
            .indices
            .get(index)
            .ok_or_else(|| GatewayError::IndexNotFound(index.to_owned()))?;
        Ok(state.documents.get(id).cloned())
    }

    pub fn mapping(&self, index: &str) -> Result<Option<Value>, GatewayError> {
        Ok(self
            .inner()?
            .indices
            .get(index)
            .map(|state| state.mapping.clone()))
    }

    fn update_bindings(&self, actions: &[AliasAction]) -> Result<(), GatewayError> {
        let mut inner = self.inner()?;
        // validate everything before touching the alias table
        for action in actions {
            if action.op == AliasOp::Add && !inner.indices.contains_key(&action.index) {
                return Err(GatewayError::AliasRejected(format!(
                    "no such index [{}] for {action}",
                    action.index
                )));
            }
            if inner.indices.contains_key(&action.alias) {
                return Err(GatewayError::AliasRejected(format!(
                    "an index exists with the same name as the alias [{}]",
                    action.alias
                )));
            }
        }
        for action in actions {
            match action.op {
                AliasOp::Add => {
                    inner
                        .aliases
                        .entry(action.alias.clone())
                        .or_default()
                        .insert(action.index.clone());
                }
                AliasOp::Remove => {
                    if let Some(bound) = inner.aliases.get_mut(&action.alias) {
                        bound.remove(&action.index);
                    }
                }
            }
        }
        inner.aliases.retain(|_, bound| !bound.is_empty());
        Ok(())
    }
}

impl Debug for InMemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InMemoryCluster")
    }
}

fn sort_key_of(id: &str) -> Checkpoint {
    Checkpoint::new(json!([id]))
}

fn id_of(checkpoint: &Checkpoint) -> Result<&str, GatewayError> {
    checkpoint
        .as_value()
        .get(0)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse(format!("unusable checkpoint {checkpoint}")))
}

#[async_trait::async_trait]
impl ClusterGateway for InMemoryCluster {
    async fn create_index(
        &self,
        name: &str,
        mapping: &Value,
    ) -> Result<CreateIndexOutcome, GatewayError> {
        let mut inner = self.inner()?;
        if inner.aliases.contains_key(name) {
            return Err(GatewayError::Custom(format!(
                "invalid index name [{name}], already exists as alias"
            )));
        }
        if let Some(existing) = inner.indices.get(name) {
            if mapping_matches(mapping, &existing.mapping) {
                return Ok(CreateIndexOutcome::AlreadyExists);
            }
            return Err(GatewayError::MappingConflict {
                index: name.to_owned(),
                detail: format!(
                    "existing mapping {} differs from requested {mapping}",
                    existing.mapping
                ),
            });
        }
        inner.indices.insert(
            name.to_owned(),
            IndexState {
                mapping: mapping.clone(),
                documents: BTreeMap::new(),
            },
        );
        Ok(CreateIndexOutcome::Created)
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), GatewayError> {
        self.update_bindings(actions)
    }

    async fn delete_index(&self, name: &str) -> Result<DeleteIndexOutcome, GatewayError> {
        let mut inner = self.inner()?;
        if inner.indices.remove(name).is_none() {
            return Ok(DeleteIndexOutcome::NotFound);
        }
        for bound in inner.aliases.values_mut() {
            bound.remove(name);
        }
        inner.aliases.retain(|_, bound| !bound.is_empty());
        Ok(DeleteIndexOutcome::Deleted)
    }

    async fn read_page(
        &self,
        index: &str,
        after: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<Document>, GatewayError> {
        let inner = self.inner()?;
        let state = inner
            .indices
            .get(index)
            .ok_or_else(|| GatewayError::IndexNotFound(index.to_owned()))?;

        let after = after.map(id_of).transpose()?;
        let documents = state
            .documents
            .iter()
            .filter(|(id, _)| after.is_none_or(|after| id.as_str() > after))
            .take(limit)
            .map(|(id, source)| Document {
                id: id.clone(),
                source: source.clone(),
                sort_key: sort_key_of(id),
            })
            .collect();
        Ok(documents)
    }

    async fn write_page(
        &self,
        index: &str,
        documents: &[Document],
    ) -> Result<Vec<DocumentFailure>, GatewayError> {
        let mut inner = self.inner()?;
        let state = inner
            .indices
            .get_mut(index)
            .ok_or_else(|| GatewayError::IndexNotFound(index.to_owned()))?;
        for document in documents {
            state
                .documents
                .insert(document.id.clone(), document.source.clone());
        }
        Ok(Vec::new())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>, GatewayError> {
        Ok(self
            .inner()?
            .aliases
            .get(alias)
            .map(|bound| bound.iter().cloned().collect())
            .unwrap_or_default())
    }
}
