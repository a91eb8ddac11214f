#![allow(dead_code)]

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use reindexer_core::{
    AliasAction, Checkpoint, Document, DocumentFailure, LedgerEntry, MigrationPhase,
    MigrationPlan,
};
use reindexer_gateway::{
    ClusterGateway, CreateIndexOutcome, DeleteIndexOutcome, GatewayError, InMemoryCluster,
};
use reindexer_ledger::{LedgerEngine, LedgerError, store_db::in_memory::Store};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub const MIGRATION_ID: &str = "orders-reindex";

pub fn orders_mapping() -> Value {
    json!({ "properties": { "sku": { "type": "keyword" }, "total": { "type": "double" } } })
}

/// `orders_v1` holding `count` documents, with `orders` pointing at it.
pub fn orders_cluster(count: usize) -> InMemoryCluster {
    let cluster = InMemoryCluster::new();
    let documents = (1..=count).map(|i| (i.to_string(), json!({ "sku": format!("sku-{i}"), "total": i })));
    cluster
        .seed_index("orders_v1", json!({}), documents)
        .expect("seed source");
    cluster
        .bind_alias("orders", "orders_v1")
        .expect("bind alias");
    cluster
}

pub fn orders_plan(batch_size: usize) -> MigrationPlan {
    MigrationPlan::builder("orders_v1", "orders_v2", "orders")
        .migration_id(MIGRATION_ID)
        .mapping(orders_mapping())
        .batch_size(batch_size)
        .retry_base_delay(Duration::ZERO)
        .build()
        .expect("valid plan")
}

#[derive(Debug, Default)]
struct Faults {
    /// Operation name to the number of upcoming calls that fail transiently.
    transient: HashMap<&'static str, u32>,
    rejected_ids: BTreeSet<String>,
    cancel_after_writes: Option<(usize, CancellationToken)>,
}

/// Wraps an [`InMemoryCluster`], counting calls per operation and injecting
/// failures on demand.
#[derive(Debug)]
pub struct FaultyGateway {
    pub cluster: InMemoryCluster,
    calls: Mutex<HashMap<&'static str, usize>>,
    faults: Mutex<Faults>,
    alias_requests: Mutex<Vec<Vec<AliasAction>>>,
}

impl FaultyGateway {
    pub fn new(cluster: InMemoryCluster) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            calls: Mutex::default(),
            faults: Mutex::default(),
            alias_requests: Mutex::default(),
        })
    }

    pub fn fail_next(&self, operation: &'static str, times: u32) {
        self.faults
            .lock()
            .expect("faults lock")
            .transient
            .insert(operation, times);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock().expect("faults lock") = Faults::default();
    }

    pub fn reject_documents(&self, ids: &[&str]) {
        self.faults
            .lock()
            .expect("faults lock")
            .rejected_ids
            .extend(ids.iter().map(|id| (*id).to_owned()));
    }

    /// Fires `token` once the `writes`-th `write_page` call has gone through.
    pub fn cancel_after_writes(&self, writes: usize, token: CancellationToken) {
        self.faults.lock().expect("faults lock").cancel_after_writes = Some((writes, token));
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    pub fn alias_requests(&self) -> Vec<Vec<AliasAction>> {
        self.alias_requests.lock().expect("alias lock").clone()
    }

    fn enter(&self, operation: &'static str) -> Result<usize, GatewayError> {
        let count = {
            let mut calls = self.calls.lock().expect("calls lock");
            let count = calls.entry(operation).or_default();
            *count += 1;
            *count
        };
        let mut faults = self.faults.lock().expect("faults lock");
        if let Some(remaining) = faults.transient.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(GatewayError::Unavailable(format!(
                    "injected timeout on {operation}"
                )));
            }
        }
        Ok(count)
    }
}

#[async_trait::async_trait]
impl ClusterGateway for FaultyGateway {
    async fn create_index(
        &self,
        name: &str,
        mapping: &Value,
    ) -> Result<CreateIndexOutcome, GatewayError> {
        self.enter("create_index")?;
        self.cluster.create_index(name, mapping).await
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), GatewayError> {
        self.enter("update_aliases")?;
        self.alias_requests
            .lock()
            .expect("alias lock")
            .push(actions.to_vec());
        self.cluster.update_aliases(actions).await
    }

    async fn delete_index(&self, name: &str) -> Result<DeleteIndexOutcome, GatewayError> {
        self.enter("delete_index")?;
        self.cluster.delete_index(name).await
    }

    async fn read_page(
        &self,
        index: &str,
        after: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<Document>, GatewayError> {
        self.enter("read_page")?;
        self.cluster.read_page(index, after, limit).await
    }

    async fn write_page(
        &self,
        index: &str,
        documents: &[Document],
    ) -> Result<Vec<DocumentFailure>, GatewayError> {
        let count = self.enter("write_page")?;
        let rejected = self.faults.lock().expect("faults lock").rejected_ids.clone();
        let (refused, accepted): (Vec<Document>, Vec<Document>) = documents
            .iter()
            .cloned()
            .partition(|document| rejected.contains(&document.id));

        let mut failures = self.cluster.write_page(index, &accepted).await?;
        failures.extend(refused.into_iter().map(|document| DocumentFailure {
            id: document.id,
            reason: "mapper_parsing_exception: failed to parse field [total]".to_owned(),
        }));

        let faults = self.faults.lock().expect("faults lock");
        if let Some((writes, token)) = &faults.cancel_after_writes {
            if *writes == count {
                token.cancel();
            }
        }
        Ok(failures)
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>, GatewayError> {
        self.enter("resolve_alias")?;
        self.cluster.resolve_alias(alias).await
    }
}

/// A write another process makes to the same ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignWrite {
    /// A second orchestrator moving the copy checkpoint.
    Checkpoint,
    /// An operator running `cancel`.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timing {
    Before,
    After,
}

/// Ledger engine that records the phase of every stored write and can
/// simulate a process crash by failing one chosen write before it lands, or
/// another writer racing the orchestrator.
#[derive(Debug)]
pub struct RecordingLedger {
    inner: Arc<dyn LedgerEngine>,
    writes: AtomicUsize,
    crash_at: Mutex<Option<usize>>,
    foreign: Mutex<Option<(usize, Timing, ForeignWrite)>>,
    phases: Mutex<Vec<MigrationPhase>>,
}

impl RecordingLedger {
    pub fn in_memory() -> Arc<Self> {
        Self::wrapping(Arc::new(Store::new()))
    }

    pub fn wrapping(inner: Arc<dyn LedgerEngine>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            writes: AtomicUsize::new(0),
            crash_at: Mutex::new(None),
            foreign: Mutex::new(None),
            phases: Mutex::default(),
        })
    }

    /// Makes the `write`-th write attempt (counting from 1) fail once.
    pub fn crash_on_write(&self, write: usize) {
        *self.crash_at.lock().expect("crash lock") = Some(write);
    }

    /// Lands `write` on the stored entry just before the `attempt`-th write
    /// attempt, which then loses its compare-and-set.
    pub fn foreign_write_before(&self, attempt: usize, write: ForeignWrite) {
        *self.foreign.lock().expect("foreign lock") = Some((attempt, Timing::Before, write));
    }

    /// Lands `write` on the stored entry right after the `attempt`-th write
    /// attempt succeeded.
    pub fn foreign_write_after(&self, attempt: usize, write: ForeignWrite) {
        *self.foreign.lock().expect("foreign lock") = Some((attempt, Timing::After, write));
    }

    fn take_foreign(&self, attempt: usize, timing: Timing) -> Option<ForeignWrite> {
        let mut foreign = self.foreign.lock().expect("foreign lock");
        match *foreign {
            Some((at, when, write)) if at == attempt && when == timing => {
                foreign.take();
                Some(write)
            }
            _ => None,
        }
    }

    async fn apply_foreign(&self, migration_id: &str, write: ForeignWrite) {
        let current = self
            .inner
            .get(migration_id)
            .await
            .expect("foreign read")
            .expect("entry exists");
        let mut next = current.clone();
        match write {
            ForeignWrite::Checkpoint => {
                next.last_copied_checkpoint = Some(Checkpoint::new(json!(["4"])));
            }
            ForeignWrite::Cancel => next.cancel_requested = true,
        }
        self.inner
            .compare_and_set(Some(current.version), next)
            .await
            .expect("foreign write lands");
    }

    pub fn phases(&self) -> Vec<MigrationPhase> {
        self.phases.lock().expect("phases lock").clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LedgerEngine for RecordingLedger {
    async fn get(&self, migration_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        self.inner.get(migration_id).await
    }

    async fn compare_and_set(
        &self,
        expected_version: Option<u64>,
        entry: LedgerEntry,
    ) -> Result<LedgerEntry, LedgerError> {
        let write = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let crash = {
            let mut crash_at = self.crash_at.lock().expect("crash lock");
            if *crash_at == Some(write) {
                crash_at.take();
                true
            } else {
                false
            }
        };
        if crash {
            return Err(LedgerError::Custom(format!("injected crash on write {write}")));
        }
        let migration_id = entry.migration_id.clone();
        if let Some(foreign) = self.take_foreign(write, Timing::Before) {
            self.apply_foreign(&migration_id, foreign).await;
        }

        let stored = self.inner.compare_and_set(expected_version, entry).await?;
        self.phases.lock().expect("phases lock").push(stored.phase);
        if let Some(foreign) = self.take_foreign(write, Timing::After) {
            self.apply_foreign(&migration_id, foreign).await;
        }
        Ok(stored)
    }

    async fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.list().await
    }
}

pub fn ids(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    let mut ids: Vec<String> = range.map(|i| i.to_string()).collect();
    ids.sort();
    ids
}
